//! Graph node construction.
//!
//! Node attributes are flat: scalars and lists of scalars. Nested ARM
//! `properties` are stored as JSON text.

use super::risk::{assess_rule, dest_strings, port_strings, source_strings};
use crate::graph::GraphNode;
use crate::models::{ExtractedSubnet, ProcessedRule, ResourceKind, ResourceRecord};
use serde_json::{Map, Value};

/// Reference fields that are nested structures and become their own nodes.
const NESTED_REFS: [&str; 2] = ["extractedSubnets", "processedRules"];

fn json_text(value: &Value) -> Value {
    Value::String(serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()))
}

fn base_props(
    name: &str,
    resource_type: &str,
    location: &str,
    subscription_id: &str,
    resource_group: &str,
    properties: &Value,
) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("name".into(), name.into());
    props.insert("resourceType".into(), resource_type.into());
    props.insert("location".into(), location.into());
    props.insert("subscriptionId".into(), subscription_id.into());
    props.insert("resourceGroup".into(), resource_group.into());
    props.insert("properties".into(), json_text(properties));
    props
}

/// Node for a collected resource, with every set cross reference as an attribute.
pub fn resource_node(record: &ResourceRecord) -> GraphNode {
    let mut props = base_props(
        &record.name,
        &record.resource_type,
        &record.location,
        &record.subscription_id,
        &record.resource_group,
        &record.properties,
    );
    if let Ok(Value::Object(refs)) = serde_json::to_value(&record.refs) {
        for (k, v) in refs {
            if !NESTED_REFS.contains(&k.as_str()) {
                props.insert(k, v);
            }
        }
    }
    GraphNode {
        id: record.id.clone(),
        props,
    }
}

/// Node for a subnet of `vnet`.
pub fn subnet_node(vnet: &ResourceRecord, subnet: &ExtractedSubnet) -> GraphNode {
    let mut props = base_props(
        &subnet.name,
        ResourceKind::Subnet.type_name(),
        &vnet.location,
        &vnet.subscription_id,
        &vnet.resource_group,
        &subnet.properties,
    );
    props.insert("vnetId".into(), vnet.id.clone().into());
    props.insert(
        "addressPrefix".into(),
        subnet.address_prefix.clone().unwrap_or_default().into(),
    );
    let optional = [
        ("addressRange", &subnet.address_range),
        ("nsgId", &subnet.nsg_id),
        ("routeTableId", &subnet.route_table_id),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            props.insert(key.into(), v.clone().into());
        }
    }
    if let Some(endpoints) = &subnet.service_endpoints {
        props.insert("serviceEndpoints".into(), endpoints.clone().into());
    }
    GraphNode {
        id: subnet.id.clone(),
        props,
    }
}

/// `<nsgId>/rule/<name>`, or `<nsgId>/rule/rule_<idx>` for unnamed rules.
pub fn rule_id(nsg_id: &str, idx: usize, rule: &ProcessedRule) -> String {
    if rule.name.trim().is_empty() {
        format!("{nsg_id}/rule/rule_{idx}")
    } else {
        format!("{nsg_id}/rule/{}", rule.name)
    }
}

/// Node for one effective rule of `nsg`.
pub fn rule_node(nsg: &ResourceRecord, idx: usize, rule: &ProcessedRule) -> GraphNode {
    let id = rule_id(&nsg.id, idx, rule);
    let risk = assess_rule(rule);
    let name = if rule.name.trim().is_empty() {
        format!("rule_{idx}")
    } else {
        rule.name.clone()
    };
    let rule_json = serde_json::to_value(rule).unwrap_or(Value::Null);
    let mut props = base_props(
        &name,
        ResourceKind::NsgRule.type_name(),
        &nsg.location,
        &nsg.subscription_id,
        &nsg.resource_group,
        &rule_json,
    );
    props.insert("nsgId".into(), nsg.id.clone().into());
    props.insert("direction".into(), format!("{:?}", rule.direction).into());
    props.insert("access".into(), format!("{:?}", rule.access).into());
    props.insert("priority".into(), rule.priority.into());
    props.insert("protocol".into(), rule.protocol.as_str().into());
    props.insert("ports".into(), port_strings(rule).into());
    props.insert("sourceAddresses".into(), source_strings(rule).into());
    props.insert("destAddresses".into(), dest_strings(rule).into());
    props.insert("isRisky".into(), risk.is_risky.into());
    props.insert("riskReasons".into(), risk.reasons.into());
    GraphNode { id, props }
}
