//! Topology processing logic.
//!
//! This module contains the business logic between the resource graph and the
//! graph store:
//! - [`collector`] - Batched, paginated collection across subscriptions
//! - [`normalize`] - Per-type extraction of cross references
//! - [`service_tags`] - Service tag and address expression resolution
//! - [`rule_eval`] - NSG rule evaluation and exposure analysis

mod collector;
mod normalize;
mod rule_eval;
mod service_tags;

// Re-export public functions
pub use collector::{normalize_all, CollectOptions, CollectStats, Collection, Collector};
pub use normalize::{
    extract_resource_id_from_config_id, extract_subnets, normalize, normalize_nsg,
    process_nsg_rules, vnet_address_prefixes,
};
pub use rule_eval::{
    analyze_exposure, sensitive_ports_in, sensitive_service, ExposureLevel, ExposureReport,
    RuleEvaluator, REC_ANY_ANY, REC_SENSITIVE_PORTS, SENSITIVE_PORTS,
};
pub use service_tags::{
    ServiceTagResolver, TAG_AZURE_LOAD_BALANCER, TAG_INTERNET, TAG_VIRTUAL_NETWORK,
};
