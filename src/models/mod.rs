//! Domain models for the network-topology pipeline.
//!
//! This module contains the core data structures used throughout the application:
//! - [`Cidr`] and [`IpRange`] - Address prefixes and inclusive address spans
//! - [`ProcessedRule`], [`PortRange`], [`Protocol`] - Resolved NSG rules
//! - [`ResourceRecord`] and [`NetworkRefs`] - Normalized Azure resources

mod ip;
mod resource;
mod rule;

// Re-export public types
pub use ip::{broadcast_addr, cut_addr, get_cidr_mask, Cidr, IpRange, MAX_LENGTH_V4, MAX_LENGTH_V6};
pub use resource::{ExtractedSubnet, NetworkRefs, ResourceKind, ResourceRecord};
pub use rule::{
    azure_load_balancer_ip, default_rules, parse_port_ranges, rfc1918_ranges, Access, Direction,
    PortRange, ProcessedRule, Protocol,
};
