//! NSG rule model: ports, protocols and the processed rule itself.

use super::ip::IpRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Inclusive TCP/UDP port range.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange {
        start: 0,
        end: u16::MAX,
    };

    pub fn single(port: u16) -> PortRange {
        PortRange {
            start: port,
            end: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn is_all(&self) -> bool {
        *self == PortRange::ALL
    }

    /// Number of ports covered, minus one.
    pub fn width(&self) -> u32 {
        (self.end - self.start) as u32
    }
}

/// `"80"`, `"1000-2000"`, or `"*"` for the full range.
impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_all() {
            write!(f, "*")
        } else if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parse a destination-port expression.
///
/// `""` and `"*"` mean every port. Otherwise a comma list of `N` or `A-B`.
/// A single malformed item makes the whole expression fall back to every port.
///
/// # Examples
/// ```
/// use azure_network_topology::models::{parse_port_ranges, PortRange};
/// assert_eq!(parse_port_ranges("22"), vec![PortRange::single(22)]);
/// assert_eq!(parse_port_ranges("x-y"), vec![PortRange::ALL]);
/// ```
pub fn parse_port_ranges(spec: &str) -> Vec<PortRange> {
    let spec = spec.trim();
    if spec.is_empty() || spec == "*" {
        return vec![PortRange::ALL];
    }

    let mut ranges = Vec::new();
    for item in spec.split(',') {
        match parse_port_item(item.trim()) {
            Some(r) => ranges.push(r),
            None => {
                log::debug!("malformed port item '{item}' in '{spec}', using all ports");
                return vec![PortRange::ALL];
            }
        }
    }
    if ranges.is_empty() {
        vec![PortRange::ALL]
    } else {
        ranges
    }
}

fn parse_port_item(item: &str) -> Option<PortRange> {
    if item == "*" {
        return Some(PortRange::ALL);
    }
    match item.split_once('-') {
        Some((a, b)) => {
            let start: u16 = a.trim().parse().ok()?;
            let end: u16 = b.trim().parse().ok()?;
            (start <= end).then_some(PortRange { start, end })
        }
        None => item.parse().ok().map(PortRange::single),
    }
}

/// Normalized rule protocol. `Any` is the `*` wildcard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
    Other(String),
}

impl Protocol {
    /// `tcp|6`, `udp|17`, `icmp|1`, `*|any|""` and anything else upper-cased.
    pub fn normalize(raw: &str) -> Protocol {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "tcp" | "6" => Protocol::Tcp,
            "udp" | "17" => Protocol::Udp,
            "icmp" | "1" => Protocol::Icmp,
            "*" | "any" | "" => Protocol::Any,
            _ => Protocol::Other(lower.to_ascii_uppercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Any => "*",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other(s) => s,
        }
    }

    /// A rule protocol matches a traffic protocol when it is `*` or equal.
    pub fn admits(&self, traffic: &Protocol) -> bool {
        *self == Protocol::Any || self == traffic
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        Protocol::normalize(&s)
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
    /// Anything Azure did not spell as one of the above. Never matches.
    #[serde(other)]
    Unknown,
}

impl Direction {
    pub fn parse(raw: &str) -> Direction {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inbound" => Direction::Inbound,
            "outbound" => Direction::Outbound,
            _ => Direction::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Allow,
    Deny,
    /// Treated like `Deny` by evaluation.
    #[serde(other)]
    Unknown,
}

impl Access {
    pub fn parse(raw: &str) -> Access {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allow" => Access::Allow,
            "deny" => Access::Deny,
            _ => Access::Unknown,
        }
    }
}

/// An NSG rule with every address and port expression resolved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedRule {
    pub name: String,
    pub priority: u32,
    pub direction: Direction,
    pub access: Access,
    pub protocol: Protocol,
    #[serde(rename = "sourceIPRanges", default)]
    pub source_ip_ranges: Vec<IpRange>,
    #[serde(rename = "destIPRanges", default)]
    pub dest_ip_ranges: Vec<IpRange>,
    #[serde(rename = "portRanges", default)]
    pub port_ranges: Vec<PortRange>,
}

impl ProcessedRule {
    pub fn is_inbound_allow(&self) -> bool {
        self.direction == Direction::Inbound && self.access == Access::Allow
    }

    /// True when some source range is the whole IPv4 space.
    pub fn from_internet(&self) -> bool {
        self.source_ip_ranges.iter().any(IpRange::is_full_ipv4)
    }
}

fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

/// The three RFC1918 blocks.
pub fn rfc1918_ranges() -> Vec<IpRange> {
    vec![
        IpRange {
            start: v4(10, 0, 0, 0),
            end: v4(10, 255, 255, 255),
        },
        IpRange {
            start: v4(172, 16, 0, 0),
            end: v4(172, 31, 255, 255),
        },
        IpRange {
            start: v4(192, 168, 0, 0),
            end: v4(192, 168, 255, 255),
        },
    ]
}

/// Azure's platform load-balancer probe address.
pub fn azure_load_balancer_ip() -> IpAddr {
    v4(168, 63, 129, 16)
}

fn default_rule(
    name: &str,
    priority: u32,
    direction: Direction,
    access: Access,
    source: Vec<IpRange>,
    dest: Vec<IpRange>,
) -> ProcessedRule {
    ProcessedRule {
        name: name.to_string(),
        priority,
        direction,
        access,
        protocol: Protocol::Any,
        source_ip_ranges: source,
        dest_ip_ranges: dest,
        port_ranges: vec![PortRange::ALL],
    }
}

/// The six rules Azure appends to every NSG.
pub fn default_rules() -> Vec<ProcessedRule> {
    let all = vec![IpRange::full_ipv4()];
    vec![
        default_rule(
            "AllowVnetInBound",
            65000,
            Direction::Inbound,
            Access::Allow,
            rfc1918_ranges(),
            rfc1918_ranges(),
        ),
        default_rule(
            "AllowAzureLoadBalancerInBound",
            65001,
            Direction::Inbound,
            Access::Allow,
            vec![IpRange::single(azure_load_balancer_ip())],
            all.clone(),
        ),
        default_rule(
            "DenyAllInBound",
            65500,
            Direction::Inbound,
            Access::Deny,
            all.clone(),
            all.clone(),
        ),
        default_rule(
            "AllowVnetOutBound",
            65000,
            Direction::Outbound,
            Access::Allow,
            rfc1918_ranges(),
            rfc1918_ranges(),
        ),
        default_rule(
            "AllowInternetOutBound",
            65001,
            Direction::Outbound,
            Access::Allow,
            all.clone(),
            all.clone(),
        ),
        default_rule(
            "DenyAllOutBound",
            65500,
            Direction::Outbound,
            Access::Deny,
            all.clone(),
            all,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_port_ranges_vectors() {
        assert_eq!(parse_port_ranges(""), vec![PortRange::ALL]);
        assert_eq!(parse_port_ranges("*"), vec![PortRange::ALL]);
        assert_eq!(parse_port_ranges("22"), vec![PortRange::single(22)]);
        assert_eq!(
            parse_port_ranges("1000-2000"),
            vec![PortRange {
                start: 1000,
                end: 2000
            }]
        );
        assert_eq!(
            parse_port_ranges("22,80-81"),
            vec![
                PortRange::single(22),
                PortRange {
                    start: 80,
                    end: 81
                }
            ]
        );
        assert_eq!(parse_port_ranges("x-y"), vec![PortRange::ALL]);
    }

    #[test]
    fn test_parse_port_ranges_malformed_items() {
        assert_eq!(parse_port_ranges("22,abc"), vec![PortRange::ALL]);
        assert_eq!(parse_port_ranges("90-80"), vec![PortRange::ALL]);
        assert_eq!(parse_port_ranges("70000"), vec![PortRange::ALL]);
        assert_eq!(parse_port_ranges(" 443 "), vec![PortRange::single(443)]);
    }

    #[test]
    fn test_port_range_display() {
        assert_eq!(PortRange::ALL.to_string(), "*");
        assert_eq!(PortRange::single(3389).to_string(), "3389");
        assert_eq!(PortRange { start: 8000, end: 8080 }.to_string(), "8000-8080");
    }

    #[test]
    fn test_protocol_normalize() {
        assert_eq!(Protocol::normalize("tcp"), Protocol::Tcp);
        assert_eq!(Protocol::normalize("6"), Protocol::Tcp);
        assert_eq!(Protocol::normalize("Udp"), Protocol::Udp);
        assert_eq!(Protocol::normalize("17"), Protocol::Udp);
        assert_eq!(Protocol::normalize("ICMP"), Protocol::Icmp);
        assert_eq!(Protocol::normalize("1"), Protocol::Icmp);
        assert_eq!(Protocol::normalize("*"), Protocol::Any);
        assert_eq!(Protocol::normalize("Any"), Protocol::Any);
        assert_eq!(Protocol::normalize(""), Protocol::Any);
        assert_eq!(Protocol::normalize("esp").as_str(), "ESP");
    }

    #[test]
    fn test_protocol_admits() {
        assert!(Protocol::Any.admits(&Protocol::Udp));
        assert!(Protocol::Tcp.admits(&Protocol::Tcp));
        assert!(!Protocol::Tcp.admits(&Protocol::Udp));
        assert!(!Protocol::Tcp.admits(&Protocol::Any));
    }

    #[test]
    fn test_direction_and_access_parse() {
        assert_eq!(Direction::parse("INBOUND"), Direction::Inbound);
        assert_eq!(Direction::parse("Outbound"), Direction::Outbound);
        assert_eq!(Direction::parse("sideways"), Direction::Unknown);
        assert_eq!(Access::parse("allow"), Access::Allow);
        assert_eq!(Access::parse("Deny"), Access::Deny);
        assert_eq!(Access::parse(""), Access::Unknown);
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        assert_eq!(rules.len(), 6);
        let names: Vec<(&str, u32)> = rules.iter().map(|r| (r.name.as_str(), r.priority)).collect();
        assert_eq!(
            names,
            vec![
                ("AllowVnetInBound", 65000),
                ("AllowAzureLoadBalancerInBound", 65001),
                ("DenyAllInBound", 65500),
                ("AllowVnetOutBound", 65000),
                ("AllowInternetOutBound", 65001),
                ("DenyAllOutBound", 65500),
            ]
        );
        assert!(rules.iter().all(|r| r.protocol == Protocol::Any));
        assert!(rules.iter().all(|r| r.port_ranges == vec![PortRange::ALL]));
    }

    #[test]
    fn test_processed_rule_serde_names() {
        let rule = default_rules().remove(2);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["direction"], "Inbound");
        assert_eq!(json["access"], "Deny");
        assert_eq!(json["protocol"], "*");
        assert!(json["sourceIPRanges"].is_array());
        assert!(json["destIPRanges"].is_array());
        assert_eq!(json["portRanges"][0]["end"], 65535);
        let back: ProcessedRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
