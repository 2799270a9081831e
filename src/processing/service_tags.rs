//! Service-tag and address-prefix resolution.
//!
//! NSG rules name their endpoints with service tags (`VirtualNetwork`,
//! `Internet`, ...), CIDRs, single IPs, comma lists or `*`. The
//! [`ServiceTagResolver`] turns each of these into inclusive [`IpRange`]s.

use crate::error::Result;
use crate::models::{azure_load_balancer_ip, rfc1918_ranges, Cidr, IpRange};
use std::collections::HashMap;
use std::net::IpAddr;

pub const TAG_VIRTUAL_NETWORK: &str = "VirtualNetwork";
pub const TAG_INTERNET: &str = "Internet";
pub const TAG_AZURE_LOAD_BALANCER: &str = "AzureLoadBalancer";

/// Tags we recognise but have no published ranges for.
const PLACEHOLDER_TAGS: [&str; 4] = ["AzureCloud", "AzureStorage", "AzureSQL", "AzureKeyVault"];

/// Maps tag names to address ranges. Lookups are case-insensitive.
///
/// Written only while collecting (seeding and VNet registration), read-only
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ServiceTagResolver {
    tags: HashMap<String, Vec<IpRange>>,
    vnet_ranges: Vec<IpRange>,
}

impl ServiceTagResolver {
    /// An empty resolver. Call [`update_service_tags`](Self::update_service_tags) to seed it.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver seeded with the built-in tags.
    pub fn with_defaults() -> Self {
        let mut resolver = Self::new();
        resolver.update_service_tags();
        resolver
    }

    /// Seed the built-in tags.
    ///
    /// `VirtualNetwork` is RFC1918 plus every range registered with
    /// [`add_vnet_range`](Self::add_vnet_range) so far.
    pub fn update_service_tags(&mut self) {
        let mut vnet = rfc1918_ranges();
        for r in &self.vnet_ranges {
            if !vnet.contains(r) {
                vnet.push(*r);
            }
        }
        self.insert(TAG_VIRTUAL_NETWORK, vnet);
        self.insert(TAG_INTERNET, vec![IpRange::full_ipv4()]);
        self.insert(
            TAG_AZURE_LOAD_BALANCER,
            vec![IpRange::single(azure_load_balancer_ip())],
        );
        for tag in PLACEHOLDER_TAGS {
            self.tags.entry(tag.to_ascii_lowercase()).or_default();
        }
        log::debug!("service tags seeded, {} tags known", self.tags.len());
    }

    /// Register a tenant VNet address prefix under `VirtualNetwork`.
    ///
    /// # Returns
    /// * `Err(Error::InvalidCidr)` - If `cidr` is not a valid prefix
    pub fn add_vnet_range(&mut self, cidr: &str) -> Result<()> {
        let range = Cidr::new(cidr)?.range();
        if !self.vnet_ranges.contains(&range) {
            self.vnet_ranges.push(range);
        }
        let entry = self
            .tags
            .entry(TAG_VIRTUAL_NETWORK.to_ascii_lowercase())
            .or_default();
        if !entry.contains(&range) {
            entry.push(range);
        }
        Ok(())
    }

    /// Ranges registered through [`add_vnet_range`](Self::add_vnet_range).
    pub fn vnet_ranges(&self) -> &[IpRange] {
        &self.vnet_ranges
    }

    /// Resolve an address expression. Total: unknown input yields no ranges.
    ///
    /// # Examples
    /// ```
    /// use azure_network_topology::processing::ServiceTagResolver;
    /// let r = ServiceTagResolver::with_defaults();
    /// assert_eq!(r.resolve("10.0.0.0/24")[0].to_string(), "10.0.0.0-10.0.0.255");
    /// assert!(r.resolve("NoSuchTag").is_empty());
    /// ```
    pub fn resolve(&self, spec: &str) -> Vec<IpRange> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Vec::new();
        }
        if let Some(ranges) = self.tags.get(&spec.to_ascii_lowercase()) {
            return ranges.clone();
        }
        if spec == "*" {
            return self
                .tags
                .get(&TAG_INTERNET.to_ascii_lowercase())
                .cloned()
                .unwrap_or_else(|| vec![IpRange::full_ipv4()]);
        }
        if spec.contains(',') {
            return spec.split(',').flat_map(|part| self.resolve(part)).collect();
        }
        if spec.contains('/') {
            return match Cidr::new(spec) {
                Ok(cidr) => vec![cidr.range()],
                Err(e) => {
                    log::debug!("unresolvable prefix '{spec}': {e}");
                    Vec::new()
                }
            };
        }
        match spec.parse::<IpAddr>() {
            Ok(ip) => vec![IpRange::single(ip)],
            Err(_) => {
                log::debug!("unknown service tag '{spec}'");
                Vec::new()
            }
        }
    }

    fn insert(&mut self, tag: &str, ranges: Vec<IpRange>) {
        self.tags.insert(tag.to_ascii_lowercase(), ranges);
    }
}
