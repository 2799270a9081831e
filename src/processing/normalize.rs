//! Per-type normalizers.
//!
//! Each normalizer reads the nested ARM `properties` of one resource and fills
//! the flat [`NetworkRefs`](crate::models::NetworkRefs) fields the importer
//! turns into edges. Missing or oddly shaped fields are left unset, never fatal.

use super::service_tags::ServiceTagResolver;
use crate::models::{
    default_rules, parse_port_ranges, Access, Cidr, Direction, ExtractedSubnet, ProcessedRule,
    Protocol, ResourceKind, ResourceRecord,
};
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashSet;

/// Non-empty string at a JSON pointer.
fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Array at a JSON pointer, or an empty slice.
fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Collect `pointer` from every element of the array at `array`, dropping blanks
/// and duplicates, order preserved.
fn strings_from(value: &Value, array: &str, pointer: &str) -> Vec<String> {
    array_at(value, array)
        .iter()
        .filter_map(|item| str_at(item, pointer))
        .unique()
        .collect()
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    (!v.is_empty()).then_some(v)
}

/// Cut a child configuration id back to the id of its parent resource.
///
/// `/subscriptions/s/.../networkInterfaces/nic1/ipConfigurations/ipconfig1`
/// becomes `/subscriptions/s/.../networkInterfaces/nic1` for segment
/// `networkInterfaces`.
pub fn extract_resource_id_from_config_id(config_id: &str, segment: &str) -> Option<String> {
    let parts: Vec<&str> = config_id.split('/').collect();
    let idx = parts
        .iter()
        .position(|p| p.eq_ignore_ascii_case(segment))?;
    if idx + 1 >= parts.len() || parts[idx + 1].is_empty() {
        return None;
    }
    Some(parts[..=idx + 1].join("/"))
}

/// Run the normalizer for the record's type. NSGs are handled by
/// [`normalize_nsg`] because they need the resolver.
pub fn normalize(record: &mut ResourceRecord) {
    match record.kind() {
        ResourceKind::VirtualNetwork => normalize_vnet(record),
        ResourceKind::NetworkInterface => normalize_nic(record),
        ResourceKind::VirtualMachine => normalize_vm(record),
        ResourceKind::PublicIp => normalize_public_ip(record),
        ResourceKind::LoadBalancer => normalize_load_balancer(record),
        ResourceKind::ApplicationGateway => normalize_app_gateway(record),
        ResourceKind::PrivateEndpoint => normalize_private_endpoint(record),
        ResourceKind::VmScaleSet => normalize_vmss(record),
        _ => {}
    }
}

/// Address prefixes of a VNet, from the normalized field or the raw properties.
pub fn vnet_address_prefixes(record: &ResourceRecord) -> Vec<String> {
    match &record.refs.address_space {
        Some(prefixes) => prefixes.clone(),
        None => array_at(&record.properties, "/addressSpace/addressPrefixes")
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    }
}

fn normalize_vnet(record: &mut ResourceRecord) {
    let props = &record.properties;
    let refs = &mut record.refs;
    refs.address_space = Some(
        array_at(props, "/addressSpace/addressPrefixes")
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    );
    refs.peering_ids = non_empty(strings_from(
        props,
        "/virtualNetworkPeerings",
        "/properties/remoteVirtualNetwork/id",
    ));
    refs.ddos_protection = Some(
        props
            .pointer("/enableDdosProtection")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    );
    refs.extracted_subnets = Some(extract_subnets(props));
}

/// Pull the `subnets` array out of VNet properties.
pub fn extract_subnets(vnet_properties: &Value) -> Vec<ExtractedSubnet> {
    array_at(vnet_properties, "/subnets")
        .iter()
        .filter_map(|s| {
            let id = match str_at(s, "/id") {
                Some(id) => id,
                None => {
                    log::debug!("subnet without id skipped: {s}");
                    return None;
                }
            };
            let props = s.get("properties").cloned().unwrap_or(Value::Null);
            let address_prefix = str_at(&props, "/addressPrefix")
                .or_else(|| str_at(&props, "/addressPrefixes/0"));
            let address_range = address_prefix
                .as_deref()
                .and_then(|p| Cidr::new(p).ok())
                .map(|c| c.range().to_string());
            Some(ExtractedSubnet {
                name: str_at(s, "/name").unwrap_or_default(),
                resource_type: ResourceKind::Subnet.type_name().to_string(),
                nsg_id: str_at(&props, "/networkSecurityGroup/id"),
                route_table_id: str_at(&props, "/routeTable/id"),
                service_endpoints: non_empty(strings_from(&props, "/serviceEndpoints", "/service")),
                address_prefix,
                address_range,
                properties: props,
                id,
            })
        })
        .collect()
}

fn normalize_nic(record: &mut ResourceRecord) {
    let props = &record.properties;
    let refs = &mut record.refs;
    let configs = array_at(props, "/ipConfigurations");
    let primary_cfg = configs
        .iter()
        .find(|c| c.pointer("/properties/primary").and_then(Value::as_bool) == Some(true))
        .or_else(|| configs.first());

    refs.nsg_id = str_at(props, "/networkSecurityGroup/id");
    refs.vm_id = str_at(props, "/virtualMachine/id");
    refs.application_security_groups = non_empty(
        configs
            .iter()
            .flat_map(|c| array_at(c, "/properties/applicationSecurityGroups"))
            .filter_map(|asg| str_at(asg, "/id"))
            .unique()
            .collect(),
    );
    if let Some(cfg) = primary_cfg {
        refs.private_ip_address = str_at(cfg, "/properties/privateIPAddress");
        refs.subnet_id = str_at(cfg, "/properties/subnet/id");
        refs.public_ip_id = str_at(cfg, "/properties/publicIPAddress/id");
    }
    refs.primary = props
        .pointer("/primary")
        .and_then(Value::as_bool)
        .or_else(|| {
            primary_cfg
                .and_then(|c| c.pointer("/properties/primary"))
                .and_then(Value::as_bool)
        });
}

fn normalize_vm(record: &mut ResourceRecord) {
    let props = &record.properties;
    let nics = array_at(props, "/networkProfile/networkInterfaces");
    let nic_ids: Vec<String> = nics.iter().filter_map(|n| str_at(n, "/id")).unique().collect();
    let primary_nic_id = nics
        .iter()
        .find(|n| n.pointer("/properties/primary").and_then(Value::as_bool) == Some(true))
        .and_then(|n| str_at(n, "/id"))
        .or_else(|| (nic_ids.len() == 1).then(|| nic_ids[0].clone()));
    let zone = record
        .zones
        .as_ref()
        .and_then(|z| str_at(z, "/0"))
        .or_else(|| str_at(props, "/zones/0"));

    record.refs.nic_ids = non_empty(nic_ids);
    record.refs.primary_nic_id = primary_nic_id;
    record.refs.availability_zone = zone;
}

fn normalize_public_ip(record: &mut ResourceRecord) {
    let props = &record.properties;
    let refs = &mut record.refs;
    refs.ip_address = str_at(props, "/ipAddress");
    refs.allocation_method = str_at(props, "/publicIPAllocationMethod");
    refs.ip_version = str_at(props, "/publicIPAddressVersion");
    refs.sku_name = record
        .sku
        .as_ref()
        .and_then(|s| str_at(s, "/name"))
        .or_else(|| str_at(props, "/sku/name"));
    if let Some(cfg_id) = str_at(props, "/ipConfiguration/id") {
        refs.associated_nic_id = extract_resource_id_from_config_id(&cfg_id, "networkInterfaces");
        if refs.associated_nic_id.is_none() {
            refs.associated_lb_id = extract_resource_id_from_config_id(&cfg_id, "loadBalancers");
        }
    }
}

fn normalize_load_balancer(record: &mut ResourceRecord) {
    let props = &record.properties;
    let refs = &mut record.refs;
    refs.frontend_public_ips = non_empty(strings_from(
        props,
        "/frontendIPConfigurations",
        "/properties/publicIPAddress/id",
    ));
    refs.frontend_private_ips = non_empty(strings_from(
        props,
        "/frontendIPConfigurations",
        "/properties/privateIPAddress",
    ));
    refs.backend_nics = non_empty(
        array_at(props, "/backendAddressPools")
            .iter()
            .flat_map(|pool| array_at(pool, "/properties/backendIPConfigurations"))
            .filter_map(|cfg| str_at(cfg, "/id"))
            .filter_map(|id| extract_resource_id_from_config_id(&id, "networkInterfaces"))
            .unique()
            .collect(),
    );
}

fn normalize_app_gateway(record: &mut ResourceRecord) {
    let props = &record.properties;
    let refs = &mut record.refs;
    refs.frontend_public_ips = non_empty(strings_from(
        props,
        "/frontendIPConfigurations",
        "/properties/publicIPAddress/id",
    ));
    refs.backend_addresses = non_empty(
        array_at(props, "/backendAddressPools")
            .iter()
            .flat_map(|pool| array_at(pool, "/properties/backendAddresses"))
            .filter_map(|a| str_at(a, "/ipAddress").or_else(|| str_at(a, "/fqdn")))
            .unique()
            .collect(),
    );
}

fn normalize_private_endpoint(record: &mut ResourceRecord) {
    let props = &record.properties;
    let refs = &mut record.refs;
    refs.subnet_id = str_at(props, "/subnet/id");
    refs.nic_ids = non_empty(strings_from(props, "/networkInterfaces", "/id"));
    let mut targets = strings_from(
        props,
        "/privateLinkServiceConnections",
        "/properties/privateLinkServiceId",
    );
    targets.extend(strings_from(
        props,
        "/manualPrivateLinkServiceConnections",
        "/properties/privateLinkServiceId",
    ));
    refs.target_resource_ids = non_empty(targets.into_iter().unique().collect());
}

fn normalize_vmss(record: &mut ResourceRecord) {
    let props = &record.properties;
    let nic_cfgs = array_at(props, "/virtualMachineProfile/networkProfile/networkInterfaceConfigurations");
    let ip_cfgs: Vec<&Value> = nic_cfgs
        .iter()
        .flat_map(|n| array_at(n, "/properties/ipConfigurations"))
        .collect();

    let subnet_ids = ip_cfgs
        .iter()
        .filter_map(|c| str_at(c, "/properties/subnet/id"))
        .unique()
        .collect();
    let nsg_ids = nic_cfgs
        .iter()
        .filter_map(|n| str_at(n, "/properties/networkSecurityGroup/id"))
        .unique()
        .collect();
    let pools = ip_cfgs
        .iter()
        .flat_map(|c| array_at(c, "/properties/loadBalancerBackendAddressPools"))
        .filter_map(|p| str_at(p, "/id"))
        .unique()
        .collect();
    let capacity = record
        .sku
        .as_ref()
        .and_then(|s| s.pointer("/capacity"))
        .or_else(|| props.pointer("/sku/capacity"))
        .and_then(Value::as_i64);

    record.refs.subnet_ids = non_empty(subnet_ids);
    record.refs.nsg_ids = non_empty(nsg_ids);
    record.refs.load_balancer_backend_pools = non_empty(pools);
    record.refs.instance_count = capacity;
}

/// Resolve an NSG's rules and store the effective list on the record.
pub fn normalize_nsg(record: &mut ResourceRecord, resolver: &ServiceTagResolver) {
    let rules = process_nsg_rules(&record.id, &record.properties, resolver);
    log::debug!("nsg {} -> {} effective rules", record.name, rules.len());
    record.refs.processed_rules = Some(rules);
}

/// Custom rules plus the Azure defaults, sorted by priority.
///
/// A rule whose parsed `(direction, priority)` repeats an earlier one is dropped
/// and logged; Azure never produces that. Rules without a usable priority are
/// kept and evaluated last, in collection order.
pub fn process_nsg_rules(
    nsg_id: &str,
    properties: &Value,
    resolver: &ServiceTagResolver,
) -> Vec<ProcessedRule> {
    let mut parsed: Vec<(ProcessedRule, bool)> = array_at(properties, "/securityRules")
        .iter()
        .map(|raw| process_rule(raw, resolver))
        .collect();
    parsed.extend(default_rules().into_iter().map(|r| (r, true)));

    let mut seen = HashSet::new();
    parsed.retain(|(r, has_priority)| {
        if !has_priority {
            return true;
        }
        let fresh = seen.insert((r.direction, r.priority));
        if !fresh {
            log::error!(
                "invariant violated: duplicate priority {} {:?} in {nsg_id}, dropping rule '{}'",
                r.priority,
                r.direction,
                r.name
            );
        }
        fresh
    });
    let mut rules: Vec<ProcessedRule> = parsed.into_iter().map(|(r, _)| r).collect();
    // stable: unparsed priorities stay in collection order
    rules.sort_by_key(|r| r.priority);
    rules
}

/// Rule priority as an integer or a numeric string that fits in `u32`.
fn parse_priority(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// The processed rule, and whether its priority could be parsed.
fn process_rule(raw: &Value, resolver: &ServiceTagResolver) -> (ProcessedRule, bool) {
    let p = raw.get("properties").unwrap_or(&Value::Null);
    let addresses = |single: &str, plural: &str| {
        let mut out = Vec::new();
        if let Some(s) = str_at(p, single) {
            out.extend(resolver.resolve(&s));
        }
        for item in array_at(p, plural).iter().filter_map(Value::as_str) {
            out.extend(resolver.resolve(item));
        }
        out
    };

    let mut port_ranges = Vec::new();
    if let Some(s) = str_at(p, "/destinationPortRange") {
        port_ranges.extend(parse_port_ranges(&s));
    }
    for item in array_at(p, "/destinationPortRanges").iter().filter_map(Value::as_str) {
        port_ranges.extend(parse_port_ranges(item));
    }

    let name = str_at(raw, "/name").unwrap_or_default();
    let priority = parse_priority(p.pointer("/priority"));
    if priority.is_none() {
        log::debug!("rule '{name}' has no usable priority, evaluating it last");
    }

    let rule = ProcessedRule {
        direction: Direction::parse(&str_at(p, "/direction").unwrap_or_default()),
        access: Access::parse(&str_at(p, "/access").unwrap_or_default()),
        protocol: Protocol::normalize(&str_at(p, "/protocol").unwrap_or_default()),
        source_ip_ranges: addresses("/sourceAddressPrefix", "/sourceAddressPrefixes"),
        dest_ip_ranges: addresses("/destinationAddressPrefix", "/destinationAddressPrefixes"),
        port_ranges,
        name,
        priority: priority.unwrap_or(u32::MAX),
    };
    (rule, priority.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IpRange, PortRange};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(kind: ResourceKind, id: &str, properties: Value) -> ResourceRecord {
        ResourceRecord {
            id: id.into(),
            name: id.rsplit('/').next().unwrap_or_default().into(),
            resource_type: kind.type_name().into(),
            properties,
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_resource_id_from_config_id() {
        assert_eq!(
            extract_resource_id_from_config_id(
                "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic1/ipConfigurations/ipconfig1",
                "networkInterfaces"
            )
            .as_deref(),
            Some("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic1")
        );
        assert_eq!(
            extract_resource_id_from_config_id("/a/b/loadBalancers/lb1/frontendIPConfigurations/fe", "loadbalancers")
                .as_deref(),
            Some("/a/b/loadBalancers/lb1")
        );
        assert_eq!(extract_resource_id_from_config_id("/a/networkInterfaces", "networkInterfaces"), None);
        assert_eq!(extract_resource_id_from_config_id("/a/b/c", "networkInterfaces"), None);
    }

    #[test]
    fn test_vnet_normalizer() {
        let mut vnet = record(
            ResourceKind::VirtualNetwork,
            "/vnets/v1",
            json!({
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16", "10.1.0.0/16"]},
                "enableDdosProtection": true,
                "virtualNetworkPeerings": [
                    {"properties": {"remoteVirtualNetwork": {"id": "/vnets/v2"}}}
                ],
                "subnets": [
                    {"id": "/vnets/v1/subnets/a", "name": "a", "properties": {
                        "addressPrefix": "10.0.1.0/24",
                        "networkSecurityGroup": {"id": "/nsgs/n1"},
                        "routeTable": {"id": "/rt/1"},
                        "serviceEndpoints": [{"service": "Microsoft.Storage"}]
                    }},
                    {"id": "/vnets/v1/subnets/b", "name": "b", "properties": {
                        "addressPrefixes": ["10.1.0.0/24"]
                    }},
                    {"name": "no-id"}
                ]
            }),
        );
        normalize(&mut vnet);
        let refs = &vnet.refs;
        assert_eq!(
            refs.address_space.as_deref(),
            Some(&["10.0.0.0/16".to_string(), "10.1.0.0/16".to_string()][..])
        );
        assert_eq!(refs.peering_ids.as_deref(), Some(&["/vnets/v2".to_string()][..]));
        assert_eq!(refs.ddos_protection, Some(true));
        let subnets = refs.extracted_subnets.as_ref().unwrap();
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[0].address_range.as_deref(), Some("10.0.1.0-10.0.1.255"));
        assert_eq!(subnets[0].nsg_id.as_deref(), Some("/nsgs/n1"));
        assert_eq!(subnets[0].route_table_id.as_deref(), Some("/rt/1"));
        assert_eq!(
            subnets[0].service_endpoints.as_deref(),
            Some(&["Microsoft.Storage".to_string()][..])
        );
        assert_eq!(subnets[1].address_prefix.as_deref(), Some("10.1.0.0/24"));
        assert_eq!(subnets[1].resource_type, "microsoft.network/virtualnetworks/subnets");
    }

    #[test]
    fn test_nic_normalizer_picks_primary_config() {
        let mut nic = record(
            ResourceKind::NetworkInterface,
            "/nics/n1",
            json!({
                "networkSecurityGroup": {"id": "/nsgs/n1"},
                "virtualMachine": {"id": "/vms/vm1"},
                "ipConfigurations": [
                    {"properties": {"primary": false, "privateIPAddress": "10.0.0.9",
                        "subnet": {"id": "/vnets/v1/subnets/b"}}},
                    {"properties": {"primary": true, "privateIPAddress": "10.0.0.4",
                        "subnet": {"id": "/vnets/v1/subnets/a"},
                        "publicIPAddress": {"id": "/pips/p1"},
                        "applicationSecurityGroups": [{"id": "/asgs/web"}]}}
                ]
            }),
        );
        normalize(&mut nic);
        assert_eq!(nic.refs.private_ip_address.as_deref(), Some("10.0.0.4"));
        assert_eq!(nic.refs.subnet_id.as_deref(), Some("/vnets/v1/subnets/a"));
        assert_eq!(nic.refs.public_ip_id.as_deref(), Some("/pips/p1"));
        assert_eq!(nic.refs.nsg_id.as_deref(), Some("/nsgs/n1"));
        assert_eq!(nic.refs.vm_id.as_deref(), Some("/vms/vm1"));
        assert_eq!(nic.refs.primary, Some(true));
        assert_eq!(
            nic.refs.application_security_groups.as_deref(),
            Some(&["/asgs/web".to_string()][..])
        );
    }

    #[test]
    fn test_vm_normalizer() {
        let mut vm = record(
            ResourceKind::VirtualMachine,
            "/vms/vm1",
            json!({"networkProfile": {"networkInterfaces": [
                {"id": "/nics/a", "properties": {"primary": false}},
                {"id": "/nics/b", "properties": {"primary": true}}
            ]}}),
        );
        vm.zones = Some(json!(["2"]));
        normalize(&mut vm);
        assert_eq!(vm.refs.nic_ids.as_ref().unwrap().len(), 2);
        assert_eq!(vm.refs.primary_nic_id.as_deref(), Some("/nics/b"));
        assert_eq!(vm.refs.availability_zone.as_deref(), Some("2"));
    }

    #[test]
    fn test_public_ip_normalizer() {
        let mut pip = record(
            ResourceKind::PublicIp,
            "/pips/p1",
            json!({
                "ipAddress": "20.1.2.3",
                "publicIPAllocationMethod": "Static",
                "publicIPAddressVersion": "IPv4",
                "ipConfiguration": {"id": "/x/networkInterfaces/nic1/ipConfigurations/c1"}
            }),
        );
        pip.sku = Some(json!({"name": "Standard"}));
        normalize(&mut pip);
        assert_eq!(pip.refs.ip_address.as_deref(), Some("20.1.2.3"));
        assert_eq!(pip.refs.allocation_method.as_deref(), Some("Static"));
        assert_eq!(pip.refs.sku_name.as_deref(), Some("Standard"));
        assert_eq!(pip.refs.associated_nic_id.as_deref(), Some("/x/networkInterfaces/nic1"));
        assert_eq!(pip.refs.associated_lb_id, None);

        let mut lb_pip = record(
            ResourceKind::PublicIp,
            "/pips/p2",
            json!({"ipConfiguration": {"id": "/x/loadBalancers/lb1/frontendIPConfigurations/fe"}}),
        );
        normalize(&mut lb_pip);
        assert_eq!(lb_pip.refs.associated_lb_id.as_deref(), Some("/x/loadBalancers/lb1"));
    }

    #[test]
    fn test_lb_and_appgw_normalizers() {
        let mut lb = record(
            ResourceKind::LoadBalancer,
            "/lbs/lb1",
            json!({
                "frontendIPConfigurations": [
                    {"properties": {"publicIPAddress": {"id": "/pips/p1"}}},
                    {"properties": {"privateIPAddress": "10.0.0.10"}}
                ],
                "backendAddressPools": [{"properties": {"backendIPConfigurations": [
                    {"id": "/x/networkInterfaces/nic1/ipConfigurations/c1"},
                    {"id": "/x/networkInterfaces/nic1/ipConfigurations/c2"}
                ]}}]
            }),
        );
        normalize(&mut lb);
        assert_eq!(lb.refs.frontend_public_ips.as_deref(), Some(&["/pips/p1".to_string()][..]));
        assert_eq!(lb.refs.frontend_private_ips.as_deref(), Some(&["10.0.0.10".to_string()][..]));
        assert_eq!(
            lb.refs.backend_nics.as_deref(),
            Some(&["/x/networkInterfaces/nic1".to_string()][..])
        );

        let mut agw = record(
            ResourceKind::ApplicationGateway,
            "/agw/a1",
            json!({
                "frontendIPConfigurations": [{"properties": {"publicIPAddress": {"id": "/pips/p9"}}}],
                "backendAddressPools": [{"properties": {"backendAddresses": [
                    {"ipAddress": "10.0.2.4"}, {"fqdn": "app.internal"}
                ]}}]
            }),
        );
        normalize(&mut agw);
        assert_eq!(agw.refs.frontend_public_ips.as_deref(), Some(&["/pips/p9".to_string()][..]));
        assert_eq!(
            agw.refs.backend_addresses.as_deref(),
            Some(&["10.0.2.4".to_string(), "app.internal".to_string()][..])
        );
    }

    #[test]
    fn test_private_endpoint_and_vmss_normalizers() {
        let mut pe = record(
            ResourceKind::PrivateEndpoint,
            "/pes/pe1",
            json!({
                "subnet": {"id": "/vnets/v1/subnets/a"},
                "networkInterfaces": [{"id": "/nics/pe-nic"}],
                "privateLinkServiceConnections": [{"properties": {"privateLinkServiceId": "/kv/vault1"}}],
                "manualPrivateLinkServiceConnections": [{"properties": {"privateLinkServiceId": "/sql/s1"}}]
            }),
        );
        normalize(&mut pe);
        assert_eq!(pe.refs.subnet_id.as_deref(), Some("/vnets/v1/subnets/a"));
        assert_eq!(
            pe.refs.target_resource_ids.as_deref(),
            Some(&["/kv/vault1".to_string(), "/sql/s1".to_string()][..])
        );

        let mut vmss = record(
            ResourceKind::VmScaleSet,
            "/vmss/s1",
            json!({"virtualMachineProfile": {"networkProfile": {"networkInterfaceConfigurations": [
                {"properties": {
                    "networkSecurityGroup": {"id": "/nsgs/n2"},
                    "ipConfigurations": [{"properties": {
                        "subnet": {"id": "/vnets/v1/subnets/a"},
                        "loadBalancerBackendAddressPools": [{"id": "/lbs/lb1/backendAddressPools/pool"}]
                    }}]
                }}
            ]}}}),
        );
        vmss.sku = Some(json!({"name": "Standard_D2s_v3", "capacity": 3}));
        normalize(&mut vmss);
        assert_eq!(vmss.refs.subnet_ids.as_deref(), Some(&["/vnets/v1/subnets/a".to_string()][..]));
        assert_eq!(vmss.refs.nsg_ids.as_deref(), Some(&["/nsgs/n2".to_string()][..]));
        assert_eq!(vmss.refs.load_balancer_backend_pools.as_ref().unwrap().len(), 1);
        assert_eq!(vmss.refs.instance_count, Some(3));
    }

    #[test]
    fn test_nsg_rules_expanded_and_sorted() {
        let resolver = ServiceTagResolver::with_defaults();
        let mut nsg = record(
            ResourceKind::NetworkSecurityGroup,
            "/nsgs/n1",
            json!({"securityRules": [
                {"name": "web", "properties": {
                    "priority": 200, "direction": "Inbound", "access": "Allow", "protocol": "Tcp",
                    "sourceAddressPrefix": "Internet", "destinationAddressPrefix": "*",
                    "destinationPortRanges": ["80", "443"]
                }},
                {"name": "ssh", "properties": {
                    "priority": 100, "direction": "Inbound", "access": "Allow", "protocol": "Tcp",
                    "sourceAddressPrefixes": ["10.0.0.0/24", "10.0.1.0/24"],
                    "destinationAddressPrefix": "VirtualNetwork",
                    "destinationPortRange": "22"
                }},
                {"name": "weird", "properties": {
                    "priority": 300, "direction": "Inbound", "access": "Allow", "protocol": "Tcp",
                    "sourceAddressPrefix": "SomeUnknownTag"
                }}
            ]}),
        );
        normalize_nsg(&mut nsg, &resolver);
        let rules = nsg.refs.processed_rules.as_ref().unwrap();
        assert_eq!(rules.len(), 9);
        assert_eq!(rules[0].name, "ssh");
        assert_eq!(rules[0].source_ip_ranges.len(), 2);
        assert_eq!(rules[0].dest_ip_ranges.len(), 3);
        assert_eq!(rules[0].port_ranges, vec![PortRange::single(22)]);
        assert_eq!(rules[1].name, "web");
        assert_eq!(rules[1].source_ip_ranges, vec![IpRange::full_ipv4()]);
        assert_eq!(rules[1].port_ranges, vec![PortRange::single(80), PortRange::single(443)]);
        // kept, with empty sequences for what could not be resolved
        assert_eq!(rules[2].name, "weird");
        assert!(rules[2].source_ip_ranges.is_empty());
        assert!(rules[2].port_ranges.is_empty());
        let priorities: Vec<u32> = rules.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_nsg_duplicate_priority_dropped() {
        let resolver = ServiceTagResolver::with_defaults();
        let props = json!({"securityRules": [
            {"name": "first", "properties": {"priority": 100, "direction": "Inbound", "access": "Deny"}},
            {"name": "second", "properties": {"priority": 100, "direction": "Inbound", "access": "Allow"}},
            {"name": "out", "properties": {"priority": 100, "direction": "Outbound", "access": "Allow"}}
        ]});
        let rules = process_nsg_rules("/nsgs/n1", &props, &resolver);
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"first"));
        assert!(names.contains(&"out"));
        assert!(!names.contains(&"second"));
        assert_eq!(rules.len(), 8);
    }

    #[test]
    fn test_nsg_rules_without_usable_priority_are_kept() {
        let resolver = ServiceTagResolver::with_defaults();
        let props = json!({"securityRules": [
            {"name": "a", "properties": {"direction": "Inbound", "access": "Allow", "destinationPortRange": "80"}},
            {"name": "b", "properties": {"direction": "Inbound", "access": "Deny", "destinationPortRange": "22"}},
            {"name": "c", "properties": {"priority": "200", "direction": "Inbound", "access": "Allow"}},
            {"name": "huge", "properties": {"priority": 4294967396u64, "direction": "Inbound", "access": "Deny"}}
        ]});
        let rules = process_nsg_rules("/nsgs/n1", &props, &resolver);
        assert_eq!(rules.len(), 10);

        let c = rules.iter().find(|r| r.name == "c").unwrap();
        assert_eq!(c.priority, 200);
        // out of range is unparsed, not truncated to 100
        let huge = rules.iter().find(|r| r.name == "huge").unwrap();
        assert_eq!(huge.priority, u32::MAX);

        let last: Vec<&str> = rules[7..].iter().map(|r| r.name.as_str()).collect();
        assert_eq!(last, vec!["a", "b", "huge"]);
    }
}
