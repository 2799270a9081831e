//! Risk flags and display strings for NSG rule nodes.

use crate::models::{IpRange, ProcessedRule};
use crate::processing::sensitive_ports_in;
use std::collections::BTreeMap;

pub const REASON_INTERNET_SOURCE: &str = "Source: Internet (0.0.0.0/0)";
pub const REASON_ALL_PORTS: &str = "All ports open";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleRisk {
    pub is_risky: bool,
    pub reasons: Vec<String>,
}

/// A rule is risky when it allows inbound traffic from the whole IPv4 space.
pub fn assess_rule(rule: &ProcessedRule) -> RuleRisk {
    if !(rule.is_inbound_allow() && rule.from_internet()) {
        return RuleRisk::default();
    }

    let mut reasons = vec![REASON_INTERNET_SOURCE.to_string()];
    let exposed: BTreeMap<u16, &str> = rule
        .port_ranges
        .iter()
        .flat_map(sensitive_ports_in)
        .collect();
    reasons.extend(
        exposed
            .iter()
            .map(|(port, service)| format!("Port {port} ({service}) exposed")),
    );
    if rule.port_ranges.iter().any(|r| r.is_all()) {
        reasons.push(REASON_ALL_PORTS.to_string());
    }
    RuleRisk {
        is_risky: true,
        reasons,
    }
}

pub fn port_strings(rule: &ProcessedRule) -> Vec<String> {
    rule.port_ranges.iter().map(ToString::to_string).collect()
}

fn address_string(range: &IpRange, full_label: &str) -> String {
    if range.is_full_ipv4() {
        full_label.to_string()
    } else if range.is_single() {
        range.start.to_string()
    } else {
        range.to_string()
    }
}

/// `"Internet"` for the full space, `"a.b.c.d"` or `"start-end"` otherwise.
pub fn source_strings(rule: &ProcessedRule) -> Vec<String> {
    rule.source_ip_ranges
        .iter()
        .map(|r| address_string(r, "Internet"))
        .collect()
}

/// As [`source_strings`], with `"Any"` for the full space.
pub fn dest_strings(rule: &ProcessedRule) -> Vec<String> {
    rule.dest_ip_ranges
        .iter()
        .map(|r| address_string(r, "Any"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_rules, Access, Cidr, Direction, PortRange, Protocol};
    use pretty_assertions::assert_eq;

    fn inbound(access: Access, src: &str, ports: Vec<PortRange>) -> ProcessedRule {
        ProcessedRule {
            name: "r".into(),
            priority: 100,
            direction: Direction::Inbound,
            access,
            protocol: Protocol::Tcp,
            source_ip_ranges: vec![Cidr::new(src).unwrap().range()],
            dest_ip_ranges: vec![IpRange::full_ipv4()],
            port_ranges: ports,
        }
    }

    #[test]
    fn test_rdp_from_internet() {
        let risk = assess_rule(&inbound(Access::Allow, "0.0.0.0/0", vec![PortRange::single(3389)]));
        assert!(risk.is_risky);
        assert_eq!(
            risk.reasons,
            vec![
                "Source: Internet (0.0.0.0/0)".to_string(),
                "Port 3389 (RDP) exposed".to_string()
            ]
        );
    }

    #[test]
    fn test_all_ports_lists_every_sensitive_port() {
        let risk = assess_rule(&inbound(Access::Allow, "0.0.0.0/0", vec![PortRange::ALL]));
        assert!(risk.is_risky);
        assert_eq!(risk.reasons.len(), 1 + 11 + 1);
        assert_eq!(risk.reasons[1], "Port 22 (SSH) exposed");
        assert_eq!(risk.reasons.last().unwrap(), REASON_ALL_PORTS);
    }

    #[test]
    fn test_not_risky() {
        assert!(!assess_rule(&inbound(Access::Deny, "0.0.0.0/0", vec![PortRange::ALL])).is_risky);
        assert!(!assess_rule(&inbound(Access::Allow, "10.0.0.0/8", vec![PortRange::ALL])).is_risky);
        // DenyAllInBound has an Internet source but denies
        assert!(default_rules().iter().all(|r| !assess_rule(r).is_risky));
    }

    #[test]
    fn test_display_strings() {
        let mut rule = inbound(
            Access::Allow,
            "0.0.0.0/0",
            vec![PortRange::single(80), PortRange::ALL, PortRange { start: 1000, end: 2000 }],
        );
        rule.source_ip_ranges.push(Cidr::new("10.0.0.0/24").unwrap().range());
        rule.source_ip_ranges.push(Cidr::new("1.2.3.4/32").unwrap().range());
        assert_eq!(port_strings(&rule), vec!["80", "*", "1000-2000"]);
        assert_eq!(
            source_strings(&rule),
            vec!["Internet", "10.0.0.0-10.0.0.255", "1.2.3.4"]
        );
        assert_eq!(dest_strings(&rule), vec!["Any"]);
    }
}
