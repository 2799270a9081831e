//! Normalized Azure resource record.
//!
//! A [`ResourceRecord`] is one resource-graph row plus the typed cross
//! references the normalizers pull out of its nested `properties`. The same
//! shape is written to and read from snapshots.

use super::rule::ProcessedRule;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Resource types the pipeline knows about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    VirtualNetwork,
    NetworkInterface,
    PublicIp,
    NetworkSecurityGroup,
    PrivateEndpoint,
    LoadBalancer,
    ApplicationGateway,
    AzureFirewall,
    VirtualMachine,
    VmScaleSet,
    ManagedCluster,
    WebSite,
    SqlServer,
    StorageAccount,
    KeyVault,
    /// Derived from a VNet's `subnets` array.
    Subnet,
    /// Derived from an NSG's processed rules.
    NsgRule,
    /// The single synthetic Internet node.
    Internet,
    Other,
}

impl ResourceKind {
    /// Every kind the collector asks the resource graph for.
    pub const COLLECTED: [ResourceKind; 15] = [
        ResourceKind::VirtualNetwork,
        ResourceKind::NetworkInterface,
        ResourceKind::PublicIp,
        ResourceKind::NetworkSecurityGroup,
        ResourceKind::PrivateEndpoint,
        ResourceKind::LoadBalancer,
        ResourceKind::ApplicationGateway,
        ResourceKind::AzureFirewall,
        ResourceKind::VirtualMachine,
        ResourceKind::VmScaleSet,
        ResourceKind::ManagedCluster,
        ResourceKind::WebSite,
        ResourceKind::SqlServer,
        ResourceKind::StorageAccount,
        ResourceKind::KeyVault,
    ];

    /// Lower-case ARM type string.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::VirtualNetwork => "microsoft.network/virtualnetworks",
            ResourceKind::NetworkInterface => "microsoft.network/networkinterfaces",
            ResourceKind::PublicIp => "microsoft.network/publicipaddresses",
            ResourceKind::NetworkSecurityGroup => "microsoft.network/networksecuritygroups",
            ResourceKind::PrivateEndpoint => "microsoft.network/privateendpoints",
            ResourceKind::LoadBalancer => "microsoft.network/loadbalancers",
            ResourceKind::ApplicationGateway => "microsoft.network/applicationgateways",
            ResourceKind::AzureFirewall => "microsoft.network/azurefirewalls",
            ResourceKind::VirtualMachine => "microsoft.compute/virtualmachines",
            ResourceKind::VmScaleSet => "microsoft.compute/virtualmachinescalesets",
            ResourceKind::ManagedCluster => "microsoft.containerservice/managedclusters",
            ResourceKind::WebSite => "microsoft.web/sites",
            ResourceKind::SqlServer => "microsoft.sql/servers",
            ResourceKind::StorageAccount => "microsoft.storage/storageaccounts",
            ResourceKind::KeyVault => "microsoft.keyvault/vaults",
            ResourceKind::Subnet => "microsoft.network/virtualnetworks/subnets",
            ResourceKind::NsgRule => "microsoft.network/networksecuritygroups/securityrules",
            ResourceKind::Internet => "Internet",
            ResourceKind::Other => "other",
        }
    }

    /// Map an ARM type string, case-insensitively.
    pub fn from_type(resource_type: &str) -> ResourceKind {
        let lower = resource_type.trim().to_ascii_lowercase();
        if lower == "internet" {
            return ResourceKind::Internet;
        }
        // older snapshots spell subnets without the parent segment
        if lower == "microsoft.network/subnets" {
            return ResourceKind::Subnet;
        }
        ResourceKind::COLLECTED
            .iter()
            .chain([ResourceKind::Subnet, ResourceKind::NsgRule].iter())
            .find(|k| k.type_name() == lower)
            .copied()
            .unwrap_or(ResourceKind::Other)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A subnet pulled out of its VNet's `properties.subnets`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSubnet {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub resource_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_prefix: Option<String>,
    /// `"start-end"` of the prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoints: Option<Vec<String>>,
}

/// Typed cross references, flattened next to the base fields.
///
/// Every field is optional; which ones are set depends on the resource type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRefs {
    // virtual network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_subnets: Option<Vec<ExtractedSubnet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_space: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peering_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddos_protection: Option<bool>,

    // network interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_security_groups: Option<Vec<String>>,
    #[serde(rename = "privateIPAddress", default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(rename = "publicIPId", default, skip_serializing_if = "Option::is_none")]
    pub public_ip_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,

    // virtual machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nic_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_nic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    // public ip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_nic_id: Option<String>,
    #[serde(rename = "associatedLBId", default, skip_serializing_if = "Option::is_none")]
    pub associated_lb_id: Option<String>,

    // load balancer / application gateway
    #[serde(rename = "frontendPublicIPs", default, skip_serializing_if = "Option::is_none")]
    pub frontend_public_ips: Option<Vec<String>>,
    #[serde(rename = "frontendPrivateIPs", default, skip_serializing_if = "Option::is_none")]
    pub frontend_private_ips: Option<Vec<String>>,
    #[serde(rename = "backendNICs", default, skip_serializing_if = "Option::is_none")]
    pub backend_nics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_addresses: Option<Vec<String>>,

    // private endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource_ids: Option<Vec<String>>,

    // scale set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsg_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_backend_pools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<i64>,

    // network security group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_rules: Option<Vec<ProcessedRule>>,
}

impl NetworkRefs {
    /// True when no normalizer has run on the record.
    pub fn is_empty(&self) -> bool {
        *self == NetworkRefs::default()
    }
}

/// One resource as listed by the resource graph, after normalization.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub resource_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub resource_group: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subscription_id: String,
    #[serde(default, deserialize_with = "properties_object")]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Value>,
    #[serde(flatten)]
    pub refs: NetworkRefs,
}

impl ResourceRecord {
    /// Decode one resource-graph row or snapshot entry.
    ///
    /// # Returns
    /// * `Ok(ResourceRecord)` - The decoded record
    /// * `Err(Error::Parse)` - If the row is not an object, a field has the wrong
    ///   shape, or `id` is empty
    pub fn from_value(value: Value) -> Result<ResourceRecord> {
        let record: ResourceRecord = serde_path_to_error::deserialize(value)
            .map_err(|e| Error::Parse(format!("path={} error={}", e.path(), e)))?;
        if record.id.trim().is_empty() {
            return Err(Error::Parse(format!(
                "record '{}' of type '{}' has no id",
                record.name, record.resource_type
            )));
        }
        Ok(record)
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_type(&self.resource_type)
    }

    /// `properties` as a JSON object, or `None` when it is anything else.
    pub fn props(&self) -> Option<&serde_json::Map<String, Value>> {
        self.properties.as_object()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept `properties` as an object or as JSON encoded in a string.
fn properties_object<'de, D>(deserializer: D) -> std::result::Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?.unwrap_or(Value::Null);
    Ok(match value {
        Value::Null => Value::Object(Default::default()),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(s),
        },
        other => other,
    })
}
