//! Relationship planning: the in-run node index, the pending edge queue, and
//! the fixed order relationship types are written in.

use crate::graph::{GraphEdge, RelType, INTERNET_ID};
use crate::models::{ResourceKind, ResourceRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Ids imported in this run, matched case-insensitively.
#[derive(Debug, Default)]
pub struct NodeIndex {
    by_lower: HashMap<String, (String, ResourceKind)>,
}

impl NodeIndex {
    /// Register an id. Returns `false` when an id differing only in case is
    /// already present.
    pub fn insert(&mut self, id: &str, kind: ResourceKind) -> bool {
        let key = id.to_ascii_lowercase();
        if self.by_lower.contains_key(&key) {
            return false;
        }
        self.by_lower.insert(key, (id.to_string(), kind));
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_lower.contains_key(&id.to_ascii_lowercase())
    }

    /// Stored spelling of `id`, if it was imported with a kind matching `expected`.
    pub fn resolve(&self, id: &str, expected: Option<ResourceKind>) -> Option<&str> {
        let (stored, kind) = self.by_lower.get(&id.to_ascii_lowercase())?;
        match expected {
            Some(want) if want != *kind => None,
            _ => Some(stored.as_str()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_lower.is_empty()
    }
}

/// One typed relationship: `source -[rel]-> target`. `None` kinds match any node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeSpec {
    pub source: Option<ResourceKind>,
    pub rel: RelType,
    pub target: Option<ResourceKind>,
}

impl EdgeSpec {
    const fn new(source: ResourceKind, rel: RelType, target: ResourceKind) -> Self {
        EdgeSpec {
            source: Some(source),
            rel,
            target: Some(target),
        }
    }
}

impl fmt::Display for EdgeSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = |k: Option<ResourceKind>| k.map_or("Resource".to_string(), |k| k.to_string());
        write!(f, "{}-[{}]->{}", kind(self.source), self.rel, kind(self.target))
    }
}

use ResourceKind::*;

pub const VNET_CONTAINS_SUBNET: EdgeSpec = EdgeSpec::new(VirtualNetwork, RelType::Contains, Subnet);
pub const NIC_IN_SUBNET: EdgeSpec = EdgeSpec::new(NetworkInterface, RelType::In, Subnet);
pub const NSG_PROTECTS_NIC: EdgeSpec =
    EdgeSpec::new(NetworkSecurityGroup, RelType::Protects, NetworkInterface);
pub const NSG_PROTECTS_SUBNET: EdgeSpec =
    EdgeSpec::new(NetworkSecurityGroup, RelType::Protects, Subnet);
pub const VM_USES_NIC: EdgeSpec = EdgeSpec::new(VirtualMachine, RelType::Uses, NetworkInterface);
pub const NIC_USES_PUBLIC_IP: EdgeSpec = EdgeSpec::new(NetworkInterface, RelType::Uses, PublicIp);
pub const PUBLIC_IP_EXPOSES_NIC: EdgeSpec =
    EdgeSpec::new(PublicIp, RelType::Exposes, NetworkInterface);
pub const INTERNET_EXPOSES_PUBLIC_IP: EdgeSpec = EdgeSpec::new(Internet, RelType::Exposes, PublicIp);
pub const VNET_PEERED_WITH_VNET: EdgeSpec =
    EdgeSpec::new(VirtualNetwork, RelType::PeeredWith, VirtualNetwork);
pub const NSG_HAS_RULE: EdgeSpec = EdgeSpec::new(NetworkSecurityGroup, RelType::HasRule, NsgRule);
pub const PUBLIC_IP_FRONTEND_LB: EdgeSpec =
    EdgeSpec::new(PublicIp, RelType::FrontendIp, LoadBalancer);
pub const PUBLIC_IP_FRONTEND_APP_GATEWAY: EdgeSpec =
    EdgeSpec::new(PublicIp, RelType::FrontendIp, ApplicationGateway);
pub const LB_BACKEND_POOL_NIC: EdgeSpec =
    EdgeSpec::new(LoadBalancer, RelType::BackendPool, NetworkInterface);
pub const PRIVATE_ENDPOINT_IN_SUBNET: EdgeSpec = EdgeSpec::new(PrivateEndpoint, RelType::In, Subnet);
pub const PRIVATE_ENDPOINT_CONNECTS_TO: EdgeSpec = EdgeSpec {
    source: Some(PrivateEndpoint),
    rel: RelType::ConnectsTo,
    target: None,
};
pub const VMSS_IN_SUBNET: EdgeSpec = EdgeSpec::new(VmScaleSet, RelType::In, Subnet);
pub const NSG_PROTECTS_VMSS: EdgeSpec = EdgeSpec::new(NetworkSecurityGroup, RelType::Protects, VmScaleSet);

/// Where a step's candidate edges come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSource {
    /// Planned from the records and derived nodes.
    Direct,
    /// Queued during the node phase and flushed here.
    Pending,
}

/// Relationship steps, in write order.
pub const EDGE_ORDER: [(EdgeSpec, EdgeSource); 17] = [
    (VNET_CONTAINS_SUBNET, EdgeSource::Direct),
    (NIC_IN_SUBNET, EdgeSource::Direct),
    (NSG_PROTECTS_NIC, EdgeSource::Direct),
    (NSG_PROTECTS_SUBNET, EdgeSource::Direct),
    (VM_USES_NIC, EdgeSource::Direct),
    (NIC_USES_PUBLIC_IP, EdgeSource::Direct),
    (PUBLIC_IP_EXPOSES_NIC, EdgeSource::Direct),
    (INTERNET_EXPOSES_PUBLIC_IP, EdgeSource::Direct),
    (VNET_PEERED_WITH_VNET, EdgeSource::Direct),
    (NSG_HAS_RULE, EdgeSource::Direct),
    (PUBLIC_IP_FRONTEND_LB, EdgeSource::Pending),
    (PUBLIC_IP_FRONTEND_APP_GATEWAY, EdgeSource::Pending),
    (LB_BACKEND_POOL_NIC, EdgeSource::Pending),
    (PRIVATE_ENDPOINT_IN_SUBNET, EdgeSource::Direct),
    (PRIVATE_ENDPOINT_CONNECTS_TO, EdgeSource::Pending),
    (VMSS_IN_SUBNET, EdgeSource::Pending),
    (NSG_PROTECTS_VMSS, EdgeSource::Pending),
];

/// Edges whose endpoints may not exist until every node is written.
#[derive(Debug, Default)]
pub struct PendingEdges {
    queue: BTreeMap<EdgeSpec, Vec<GraphEdge>>,
}

impl PendingEdges {
    pub fn push(&mut self, spec: EdgeSpec, edge: GraphEdge) {
        self.queue.entry(spec).or_default().push(edge);
    }

    pub fn take(&mut self, spec: &EdgeSpec) -> Vec<GraphEdge> {
        self.queue.remove(spec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.queue.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue the deferred edges a record declares.
    pub fn queue_record(&mut self, record: &ResourceRecord) {
        let refs = &record.refs;
        let id = record.id.as_str();
        match record.kind() {
            LoadBalancer => {
                for pip in refs.frontend_public_ips.iter().flatten() {
                    self.push(PUBLIC_IP_FRONTEND_LB, GraphEdge::new(pip, id));
                }
                for nic in refs.backend_nics.iter().flatten() {
                    self.push(LB_BACKEND_POOL_NIC, GraphEdge::new(id, nic));
                }
            }
            ApplicationGateway => {
                for pip in refs.frontend_public_ips.iter().flatten() {
                    self.push(PUBLIC_IP_FRONTEND_APP_GATEWAY, GraphEdge::new(pip, id));
                }
            }
            PrivateEndpoint => {
                for target in refs.target_resource_ids.iter().flatten() {
                    self.push(PRIVATE_ENDPOINT_CONNECTS_TO, GraphEdge::new(id, target));
                }
            }
            VmScaleSet => {
                for subnet in refs.subnet_ids.iter().flatten() {
                    self.push(VMSS_IN_SUBNET, GraphEdge::new(id, subnet));
                }
                for nsg in refs.nsg_ids.iter().flatten() {
                    self.push(NSG_PROTECTS_VMSS, GraphEdge::new(nsg, id));
                }
            }
            _ => {}
        }
    }
}

/// Subnet and rule nodes produced in the node phase, as `(parent, child)` pairs.
#[derive(Debug, Default)]
pub struct DerivedLinks {
    /// `(vnetId, subnetId, nsgId)`
    pub subnets: Vec<(String, String, Option<String>)>,
    /// `(nsgId, ruleId)`
    pub rules: Vec<(String, String)>,
}

/// Candidate edges for a [`EdgeSource::Direct`] step.
pub fn direct_edges(
    spec: &EdgeSpec,
    records: &[&ResourceRecord],
    derived: &DerivedLinks,
) -> Vec<GraphEdge> {
    let of_kind = |kind: ResourceKind| records.iter().copied().filter(move |r| r.kind() == kind);
    match *spec {
        VNET_CONTAINS_SUBNET => derived
            .subnets
            .iter()
            .map(|(vnet, subnet, _)| GraphEdge::new(vnet, subnet))
            .collect(),
        NIC_IN_SUBNET => of_kind(NetworkInterface)
            .filter_map(|nic| nic.refs.subnet_id.as_ref().map(|s| GraphEdge::new(&nic.id, s)))
            .collect(),
        NSG_PROTECTS_NIC => of_kind(NetworkInterface)
            .filter_map(|nic| nic.refs.nsg_id.as_ref().map(|n| GraphEdge::new(n, &nic.id)))
            .collect(),
        NSG_PROTECTS_SUBNET => derived
            .subnets
            .iter()
            .filter_map(|(_, subnet, nsg)| nsg.as_ref().map(|n| GraphEdge::new(n, subnet)))
            .collect(),
        VM_USES_NIC => of_kind(VirtualMachine)
            .flat_map(|vm| {
                vm.refs
                    .nic_ids
                    .iter()
                    .flatten()
                    .map(move |nic| GraphEdge::new(&vm.id, nic))
            })
            .collect(),
        NIC_USES_PUBLIC_IP => of_kind(NetworkInterface)
            .filter_map(|nic| nic.refs.public_ip_id.as_ref().map(|p| GraphEdge::new(&nic.id, p)))
            .collect(),
        PUBLIC_IP_EXPOSES_NIC => of_kind(PublicIp)
            .filter_map(|pip| {
                pip.refs
                    .associated_nic_id
                    .as_ref()
                    .map(|nic| GraphEdge::new(&pip.id, nic))
            })
            .collect(),
        INTERNET_EXPOSES_PUBLIC_IP => of_kind(PublicIp)
            .map(|pip| GraphEdge::new(INTERNET_ID, &pip.id))
            .collect(),
        VNET_PEERED_WITH_VNET => of_kind(VirtualNetwork)
            .flat_map(|vnet| {
                vnet.refs
                    .peering_ids
                    .iter()
                    .flatten()
                    .map(move |peer| GraphEdge::new(&vnet.id, peer))
            })
            .collect(),
        NSG_HAS_RULE => derived
            .rules
            .iter()
            .map(|(nsg, rule)| GraphEdge::new(nsg, rule))
            .collect(),
        PRIVATE_ENDPOINT_IN_SUBNET => of_kind(PrivateEndpoint)
            .filter_map(|pe| pe.refs.subnet_id.as_ref().map(|s| GraphEdge::new(&pe.id, s)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Candidate edges checked against the index.
#[derive(Debug, Default, PartialEq)]
pub struct ResolvedEdges {
    /// Edges with stored id spellings, deduplicated.
    pub ready: Vec<GraphEdge>,
    /// Edges with at least one endpoint not imported in this run.
    pub missing: Vec<GraphEdge>,
}

/// Map candidate endpoints onto imported nodes of the expected kinds.
pub fn resolve_edges(index: &NodeIndex, spec: &EdgeSpec, candidates: Vec<GraphEdge>) -> ResolvedEdges {
    let mut ready = BTreeSet::new();
    let mut missing = Vec::new();
    for edge in candidates {
        let source = index.resolve(&edge.source, spec.source);
        let target = index
            .resolve(&edge.target, spec.target)
            .filter(|_| spec.target.is_some() || !edge.target.eq_ignore_ascii_case(INTERNET_ID));
        match (source, target) {
            (Some(s), Some(t)) => {
                let resolved = GraphEdge::new(s, t);
                ready.insert(if spec.rel.is_undirected() {
                    resolved.canonical()
                } else {
                    resolved
                });
            }
            _ => missing.push(edge),
        }
    }
    ResolvedEdges {
        ready: ready.into_iter().collect(),
        missing,
    }
}
