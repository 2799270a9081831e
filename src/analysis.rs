//! Read-only analyses over a record set: Internet exposure of NICs and
//! NSG-level reachability between two endpoints.

use crate::error::{Error, Result};
use crate::models::{Access, Direction, IpRange, PortRange, ProcessedRule, Protocol, ResourceKind, ResourceRecord};
use crate::processing::{analyze_exposure, extract_subnets, ExposureLevel, ExposureReport, RuleEvaluator};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

/// Name of the synthetic rules standing in for a missing NSG.
pub const NO_NSG_RULE: &str = "NoNsgAllowAll";

/// Without an NSG Azure filters nothing.
fn allow_all_rules() -> Vec<ProcessedRule> {
    [Direction::Inbound, Direction::Outbound]
        .into_iter()
        .map(|direction| ProcessedRule {
            name: NO_NSG_RULE.to_string(),
            priority: u32::MAX,
            direction,
            access: Access::Allow,
            protocol: Protocol::Any,
            source_ip_ranges: vec![IpRange::full_ipv4()],
            dest_ip_ranges: vec![IpRange::full_ipv4()],
            port_ranges: vec![PortRange::ALL],
        })
        .collect()
}

/// Lookups over a record set, keyed by lower-case id.
pub struct TopologyView<'a> {
    records: HashMap<String, &'a ResourceRecord>,
    nsg_rules: HashMap<String, &'a [ProcessedRule]>,
    subnet_nsg: HashMap<String, String>,
    nic_by_ip: HashMap<IpAddr, &'a ResourceRecord>,
}

impl<'a> TopologyView<'a> {
    pub fn new(records: &'a [ResourceRecord]) -> Self {
        let mut view = TopologyView {
            records: HashMap::new(),
            nsg_rules: HashMap::new(),
            subnet_nsg: HashMap::new(),
            nic_by_ip: HashMap::new(),
        };
        for record in records {
            view.records.insert(record.id.to_ascii_lowercase(), record);
            match record.kind() {
                ResourceKind::NetworkSecurityGroup => {
                    if let Some(rules) = &record.refs.processed_rules {
                        view.nsg_rules
                            .insert(record.id.to_ascii_lowercase(), rules.as_slice());
                    }
                }
                ResourceKind::VirtualNetwork => {
                    let subnets = match &record.refs.extracted_subnets {
                        Some(s) => s.clone(),
                        None => extract_subnets(&record.properties),
                    };
                    for subnet in subnets {
                        if let Some(nsg) = subnet.nsg_id {
                            view.subnet_nsg.insert(subnet.id.to_ascii_lowercase(), nsg);
                        }
                    }
                }
                ResourceKind::NetworkInterface => {
                    if let Some(ip) = record
                        .refs
                        .private_ip_address
                        .as_deref()
                        .and_then(|ip| ip.parse().ok())
                    {
                        view.nic_by_ip.insert(ip, record);
                    }
                }
                _ => {}
            }
        }
        view
    }

    pub fn get(&self, id: &str) -> Option<&'a ResourceRecord> {
        self.records.get(&id.to_ascii_lowercase()).copied()
    }

    /// NSG governing a NIC: its own, else its subnet's.
    pub fn nic_nsg(&self, nic: &ResourceRecord) -> Option<String> {
        nic.refs.nsg_id.clone().or_else(|| {
            nic.refs
                .subnet_id
                .as_ref()
                .and_then(|s| self.subnet_nsg.get(&s.to_ascii_lowercase()).cloned())
        })
    }

    /// Rules of the NIC's NSG; allow-all when it has none.
    pub fn nic_rules(&self, nic: &ResourceRecord) -> (Option<String>, Vec<ProcessedRule>) {
        match self.nic_nsg(nic) {
            Some(nsg) => {
                let rules = self
                    .nsg_rules
                    .get(&nsg.to_ascii_lowercase())
                    .map(|r| r.to_vec())
                    .unwrap_or_default();
                (Some(nsg), rules)
            }
            None => (None, allow_all_rules()),
        }
    }

    /// Resolve a NIC id or an IP address to something the evaluator can use.
    ///
    /// An IP that belongs to no NIC in the set is treated as unfiltered.
    pub fn endpoint(&self, spec: &str) -> Result<Endpoint> {
        let spec = spec.trim();
        if let Some(nic) = self.get(spec) {
            if nic.kind() != ResourceKind::NetworkInterface {
                return Err(Error::InvalidInput(format!(
                    "{spec} is a {}, not a network interface",
                    nic.resource_type
                )));
            }
            let ip = nic.refs.private_ip_address.clone().ok_or_else(|| {
                Error::InvalidInput(format!("network interface {spec} has no private IP"))
            })?;
            return Ok(self.nic_endpoint(nic, ip));
        }
        let ip: IpAddr = spec.parse().map_err(|_| {
            Error::InvalidInput(format!("{spec} is neither a known NIC id nor an IP address"))
        })?;
        match self.nic_by_ip.get(&ip) {
            Some(nic) => Ok(self.nic_endpoint(nic, ip.to_string())),
            None => Ok(Endpoint {
                label: ip.to_string(),
                ip: ip.to_string(),
                nsg_id: None,
                rules: allow_all_rules(),
            }),
        }
    }

    fn nic_endpoint(&self, nic: &ResourceRecord, ip: String) -> Endpoint {
        let (nsg_id, rules) = self.nic_rules(nic);
        Endpoint {
            label: nic.name.clone(),
            ip,
            nsg_id,
            rules,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub label: String,
    pub ip: String,
    pub nsg_id: Option<String>,
    pub rules: Vec<ProcessedRule>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExposureEntry {
    pub id: String,
    pub name: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub nsg_id: Option<String>,
    #[serde(flatten)]
    pub report: ExposureReport,
}

/// Written as `exposure-report.json`.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExposureSummary {
    pub generated_at: String,
    pub by_level: BTreeMap<ExposureLevel, usize>,
    /// Most exposed first.
    pub resources: Vec<ExposureEntry>,
}

/// Classify every NIC carrying a public IP.
pub fn exposure_report(records: &[ResourceRecord]) -> ExposureSummary {
    let view = TopologyView::new(records);
    let mut resources: Vec<ExposureEntry> = records
        .iter()
        .filter(|r| r.kind() == ResourceKind::NetworkInterface)
        .filter_map(|nic| {
            let pip_id = nic.refs.public_ip_id.as_ref()?;
            let public_ip = view.get(pip_id).and_then(|p| p.refs.ip_address.clone());
            let (nsg_id, rules) = view.nic_rules(nic);
            let report = analyze_exposure(&nic.resource_type, true, &rules);
            log::debug!("exposure {}: {:?}", nic.name, report.level);
            Some(ExposureEntry {
                id: nic.id.clone(),
                name: nic.name.clone(),
                public_ip,
                private_ip: nic.refs.private_ip_address.clone(),
                nsg_id,
                report,
            })
        })
        .collect();
    resources.sort_by(|a, b| b.report.level.cmp(&a.report.level).then_with(|| a.name.cmp(&b.name)));

    let mut by_level = BTreeMap::new();
    for entry in &resources {
        *by_level.entry(entry.report.level).or_insert(0) += 1;
    }
    ExposureSummary {
        generated_at: chrono::Utc::now().to_rfc3339(),
        by_level,
        resources,
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReachResult {
    pub from: String,
    pub to: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub port: u16,
    pub protocol: String,
    pub source_nsg: Option<String>,
    pub dest_nsg: Option<String>,
    pub allowed: bool,
}

/// Can `from` reach `to` on `port/protocol` through their NSGs?
///
/// # Arguments
/// * `from`, `to` - NIC ids or IP addresses
pub fn reach(
    view: &TopologyView<'_>,
    evaluator: &mut RuleEvaluator,
    from: &str,
    to: &str,
    port: u16,
    protocol: &str,
) -> Result<ReachResult> {
    let src = view.endpoint(from)?;
    let dst = view.endpoint(to)?;
    let allowed = evaluator.can_connect(&src.ip, &dst.ip, port, protocol, &src.rules, &dst.rules);
    log::info!(
        "reach {} ({}) -> {} ({}) {port}/{protocol}: {}",
        src.label,
        src.ip,
        dst.label,
        dst.ip,
        if allowed { "allowed" } else { "denied" }
    );
    Ok(ReachResult {
        from: src.label,
        to: dst.label,
        source_ip: src.ip,
        dest_ip: dst.ip,
        port,
        protocol: protocol.to_string(),
        source_nsg: src.nsg_id,
        dest_nsg: dst.nsg_id,
        allowed,
    })
}
