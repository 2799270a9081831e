//! NSG rule evaluation and exposure classification.

use crate::models::{Access, Direction, IpRange, PortRange, ProcessedRule, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Ports that should never be reachable from the Internet, with the service name
/// used in risk reasons.
pub const SENSITIVE_PORTS: [(u16, &str); 11] = [
    (22, "SSH"),
    (23, "Telnet"),
    (135, "RPC"),
    (139, "NetBIOS"),
    (445, "SMB"),
    (1433, "SQL Server"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (5985, "WinRM HTTP"),
    (5986, "WinRM HTTPS"),
];

/// Ranges at least this wide are reported as the `-1` sentinel.
const WIDE_RANGE: u32 = 100;

pub const REC_SENSITIVE_PORTS: &str = "Restrict access to sensitive ports from Internet";
pub const REC_ANY_ANY: &str = "Remove any-any rule allowing all Internet traffic";

/// Service name for a sensitive port.
pub fn sensitive_service(port: u16) -> Option<&'static str> {
    SENSITIVE_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

/// Sensitive ports covered by a range, ascending.
pub fn sensitive_ports_in(range: &PortRange) -> impl Iterator<Item = (u16, &'static str)> + '_ {
    SENSITIVE_PORTS
        .iter()
        .copied()
        .filter(move |(p, _)| range.contains(*p))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExposureLevel {
    None,
    Private,
    Limited,
    High,
    Critical,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExposureReport {
    pub resource_type: String,
    pub has_public_ip: bool,
    pub level: ExposureLevel,
    /// Individual ports; `-1` stands for a range of 100 ports or more.
    pub open_ports: Vec<i32>,
    pub recommendations: Vec<String>,
}

/// Classify how exposed a resource is to the Internet through `rules`.
///
/// # Arguments
/// * `resource_type` - Copied into the report
/// * `has_public_ip` - Without a public IP the resource is `Private`
/// * `rules` - Effective rules of the resource's NSG
pub fn analyze_exposure(
    resource_type: &str,
    has_public_ip: bool,
    rules: &[ProcessedRule],
) -> ExposureReport {
    let mut report = ExposureReport {
        resource_type: resource_type.to_string(),
        has_public_ip,
        level: ExposureLevel::None,
        open_ports: Vec::new(),
        recommendations: Vec::new(),
    };
    if !has_public_ip {
        report.level = ExposureLevel::Private;
        return report;
    }
    report.level = ExposureLevel::Limited;

    for rule in rules
        .iter()
        .filter(|r| r.is_inbound_allow() && r.from_internet())
    {
        for range in &rule.port_ranges {
            if range.start == range.end {
                report.open_ports.push(range.start as i32);
            } else if range.width() < WIDE_RANGE {
                report
                    .open_ports
                    .extend((range.start..=range.end).map(|p| p as i32));
            } else {
                report.open_ports.push(-1);
            }

            if sensitive_ports_in(range).next().is_some() {
                raise(&mut report, ExposureLevel::High, REC_SENSITIVE_PORTS);
            }
            if rule.protocol == Protocol::Any && range.is_all() {
                raise(&mut report, ExposureLevel::Critical, REC_ANY_ANY);
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    report.open_ports.retain(|p| seen.insert(*p));
    report
}

fn raise(report: &mut ExposureReport, level: ExposureLevel, recommendation: &str) {
    report.level = report.level.max(level);
    if !report.recommendations.iter().any(|r| r == recommendation) {
        report.recommendations.push(recommendation.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EvalKey {
    src: String,
    dst: String,
    port: u16,
    protocol: Protocol,
    rules: u64,
}

fn fingerprint(source_rules: &[ProcessedRule], dest_rules: &[ProcessedRule]) -> u64 {
    let mut hasher = DefaultHasher::new();
    source_rules.hash(&mut hasher);
    dest_rules.hash(&mut hasher);
    hasher.finish()
}

/// Priority-ordered, first-match evaluation of NSG rule sets, memoized per instance.
#[derive(Debug, Default)]
pub struct RuleEvaluator {
    cache: HashMap<EvalKey, bool>,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Can `src` reach `dst:port/protocol`?
    ///
    /// The source side's outbound rules are checked first, then the destination
    /// side's inbound rules. On each side the lowest-priority matching rule
    /// decides; no match means deny. Unparseable addresses never match.
    pub fn can_connect(
        &mut self,
        src: &str,
        dst: &str,
        port: u16,
        protocol: &str,
        source_rules: &[ProcessedRule],
        dest_rules: &[ProcessedRule],
    ) -> bool {
        let key = EvalKey {
            src: src.trim().to_string(),
            dst: dst.trim().to_string(),
            port,
            protocol: Protocol::normalize(protocol),
            rules: fingerprint(source_rules, dest_rules),
        };
        if let Some(hit) = self.cache.get(&key) {
            log::trace!("can_connect cache hit {key:?}");
            return *hit;
        }

        let allowed = match (key.src.parse::<IpAddr>(), key.dst.parse::<IpAddr>()) {
            (Ok(s), Ok(d)) => {
                side_allows(source_rules, Direction::Outbound, s, d, port, &key.protocol)
                    && side_allows(dest_rules, Direction::Inbound, s, d, port, &key.protocol)
            }
            _ => false,
        };
        self.cache.insert(key, allowed);
        allowed
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn side_allows(
    rules: &[ProcessedRule],
    direction: Direction,
    src: IpAddr,
    dst: IpAddr,
    port: u16,
    protocol: &Protocol,
) -> bool {
    let mut ordered: Vec<&ProcessedRule> = rules.iter().filter(|r| r.direction == direction).collect();
    ordered.sort_by_key(|r| r.priority);
    match ordered
        .into_iter()
        .find(|r| matches_rule(r, src, dst, port, protocol))
    {
        Some(rule) => {
            log::trace!("{direction:?} decided by '{}' ({:?})", rule.name, rule.access);
            rule.access == Access::Allow
        }
        None => false,
    }
}

fn matches_rule(
    rule: &ProcessedRule,
    src: IpAddr,
    dst: IpAddr,
    port: u16,
    protocol: &Protocol,
) -> bool {
    rule.protocol.admits(protocol)
        && in_any(&rule.source_ip_ranges, src)
        && in_any(&rule.dest_ip_ranges, dst)
        && rule.port_ranges.iter().any(|r| r.contains(port))
}

fn in_any(ranges: &[IpRange], ip: IpAddr) -> bool {
    ranges.iter().any(|r| r.contains(ip))
}
