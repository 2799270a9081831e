//! Graph import.
//!
//! This module writes normalized records into a [`GraphStore`]:
//! - [`nodes`] - Resource, subnet and NSG rule node construction
//! - [`edges`] - Node index, pending edge queue and the fixed relationship order
//! - [`risk`] - Risk flags of NSG rules
//! - [`summary`] - Counters reported at the end of a run
//!
//! Steps run strictly in order: verify, optional clear, schema, Internet node,
//! resource nodes, derived nodes, relationships. A failed write batch is retried
//! once and then written item by item.

mod edges;
mod nodes;
mod risk;
mod summary;

pub use edges::{EdgeSpec, NodeIndex, PendingEdges, EDGE_ORDER};
pub use nodes::{resource_node, rule_id, rule_node, subnet_node};
pub use risk::{assess_rule, RuleRisk};
pub use summary::{EdgeCounts, ImportSummary};

use crate::cancel::Cancel;
use crate::config;
use crate::error::{Error, Result};
use crate::graph::{GraphEdge, GraphNode, GraphStore, WriteCounters, INTERNET_ID, INTERNET_NAME};
use crate::models::{ExtractedSubnet, ResourceKind, ResourceRecord};
use crate::processing::extract_subnets;
use colored::Colorize;
use edges::{direct_edges, resolve_edges, DerivedLinks, EdgeSource};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub clear_db: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: config::IMPORT_BATCH_SIZE,
            clear_db: false,
        }
    }
}

/// State of one import run.
#[derive(Default)]
struct ImportRun {
    seen: HashSet<String>,
    index: NodeIndex,
    pending: PendingEdges,
    derived: DerivedLinks,
    summary: ImportSummary,
}

impl ImportRun {
    /// First sighting of `id` in this run, ignoring case.
    fn first_sighting(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_ascii_lowercase())
    }
}

/// Errors that end the current phase instead of degrading to per-item writes.
fn aborts_phase(e: &Error) -> bool {
    matches!(
        e,
        Error::Auth(_) | Error::Cancelled | Error::Connectivity { .. }
    )
}

pub struct Importer<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    options: ImportOptions,
    cancel: Cancel,
}

impl<'a, S: GraphStore + ?Sized> Importer<'a, S> {
    pub fn new(store: &'a S, options: ImportOptions, cancel: Cancel) -> Self {
        Importer {
            store,
            options,
            cancel,
        }
    }

    /// Write `records` and everything derived from them.
    ///
    /// # Arguments
    /// * `records` - Normalized records; repeated ids are imported once
    ///
    /// # Returns
    /// * `Ok(ImportSummary)` - All phases ran; item failures are in `errors`
    /// * `Err(Error)` - A phase could not run (connectivity, auth, cancellation)
    pub async fn import(&self, records: &[ResourceRecord]) -> Result<ImportSummary> {
        let mut run = ImportRun::default();
        run.summary.started_at = chrono::Utc::now().to_rfc3339();

        log::info!("{}", "Import: verifying graph store".on_blue());
        self.store.verify_connectivity().await?;
        if self.options.clear_db {
            log::info!("{}", "Import: clearing graph store".on_red());
            self.store.clear().await?;
        }
        self.store.ensure_schema().await?;

        let internet = self.store.upsert_internet().await?;
        run.summary.add_nodes(INTERNET_NAME, internet);
        run.first_sighting(INTERNET_ID);
        run.index.insert(INTERNET_ID, ResourceKind::Internet);

        let unique = self.unique_records(records, &mut run);
        self.write_resource_nodes(&unique, &mut run).await?;
        self.write_derived_nodes(&unique, &mut run).await?;
        self.write_relationships(&unique, &mut run).await?;

        run.summary.finished_at = chrono::Utc::now().to_rfc3339();
        let nodes = run.summary.total_nodes();
        let edges = run.summary.total_edges();
        log::info!(
            "Import done: nodes written={} created={}, edges written={} created={} endpoint-missing={}",
            nodes.written,
            nodes.created,
            edges.written,
            edges.created,
            edges.endpoint_missing
        );
        Ok(run.summary)
    }

    fn unique_records<'r>(
        &self,
        records: &'r [ResourceRecord],
        run: &mut ImportRun,
    ) -> Vec<&'r ResourceRecord> {
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if record.id.trim().is_empty() {
                log::debug!("record '{}' without id skipped", record.name);
                continue;
            }
            if !run.first_sighting(&record.id) {
                log::debug!("duplicate record {} skipped", record.id);
                run.summary.duplicate_records += 1;
                continue;
            }
            unique.push(record);
        }
        run.summary.records = unique.len();
        unique
    }

    /// Step 5: one node per record, grouped by type; deferred edges are queued.
    async fn write_resource_nodes(&self, records: &[&ResourceRecord], run: &mut ImportRun) -> Result<()> {
        let mut by_type: BTreeMap<String, Vec<GraphNode>> = BTreeMap::new();
        for record in records {
            by_type
                .entry(record.resource_type.to_ascii_lowercase())
                .or_default()
                .push(resource_node(record));
            run.pending.queue_record(record);
        }
        log::info!(
            "{}",
            format!(
                "Import: {} resource nodes of {} types, {} pending edges",
                records.len(),
                by_type.len(),
                run.pending.len()
            )
            .on_blue()
        );
        for (resource_type, nodes) in &by_type {
            let kind = ResourceKind::from_type(resource_type);
            self.write_nodes("resource nodes", resource_type, kind, nodes, run)
                .await?;
        }
        Ok(())
    }

    /// Step 6: subnet nodes of every VNet and rule nodes of every NSG.
    async fn write_derived_nodes(&self, records: &[&ResourceRecord], run: &mut ImportRun) -> Result<()> {
        let mut subnets = Vec::new();
        for vnet in records
            .iter()
            .filter(|r| r.kind() == ResourceKind::VirtualNetwork)
        {
            let parsed: Vec<ExtractedSubnet>;
            let extracted = match &vnet.refs.extracted_subnets {
                Some(s) => s.as_slice(),
                None => {
                    parsed = extract_subnets(&vnet.properties);
                    parsed.as_slice()
                }
            };
            for subnet in extracted.iter().filter(|s| !s.id.trim().is_empty()) {
                if !run.first_sighting(&subnet.id) {
                    log::debug!("duplicate subnet {} skipped", subnet.id);
                    continue;
                }
                subnets.push(subnet_node(vnet, subnet));
                run.derived
                    .subnets
                    .push((vnet.id.clone(), subnet.id.clone(), subnet.nsg_id.clone()));
            }
        }

        let mut rules = Vec::new();
        for nsg in records
            .iter()
            .filter(|r| r.kind() == ResourceKind::NetworkSecurityGroup)
        {
            for (idx, rule) in nsg.refs.processed_rules.iter().flatten().enumerate() {
                let id = rule_id(&nsg.id, idx, rule);
                if !run.first_sighting(&id) {
                    log::error!("invariant violated: rule id {id} repeats, dropping it");
                    continue;
                }
                rules.push(rule_node(nsg, idx, rule));
                run.derived.rules.push((nsg.id.clone(), id));
            }
        }

        log::info!(
            "{}",
            format!("Import: {} subnet nodes, {} rule nodes", subnets.len(), rules.len()).on_blue()
        );
        let subnet_type = ResourceKind::Subnet.type_name();
        self.write_nodes("subnet nodes", subnet_type, ResourceKind::Subnet, &subnets, run)
            .await?;
        let rule_type = ResourceKind::NsgRule.type_name();
        self.write_nodes("rule nodes", rule_type, ResourceKind::NsgRule, &rules, run)
            .await
    }

    /// Step 7: every relationship type in [`EDGE_ORDER`].
    async fn write_relationships(&self, records: &[&ResourceRecord], run: &mut ImportRun) -> Result<()> {
        log::info!("{}", "Import: relationships".on_blue());
        for (spec, source) in EDGE_ORDER.iter() {
            let candidates = match source {
                EdgeSource::Direct => direct_edges(spec, records, &run.derived),
                EdgeSource::Pending => run.pending.take(spec),
            };
            if candidates.is_empty() {
                continue;
            }
            let resolved = resolve_edges(&run.index, spec, candidates);
            for edge in &resolved.missing {
                log::warn!(
                    "endpoint-missing {spec}: {} -> {}",
                    edge.source,
                    edge.target
                );
            }
            run.summary.edges(spec.rel.as_str()).endpoint_missing += resolved.missing.len() as u64;
            log::debug!("{spec}: {} edges", resolved.ready.len());
            self.write_edges(spec, &resolved.ready, &mut run.summary)
                .await?;
        }
        if !run.pending.is_empty() {
            log::warn!("{} pending edges had no relationship step", run.pending.len());
        }
        Ok(())
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Upsert `nodes` in batches; written ids go into the run's index.
    async fn write_nodes(
        &self,
        phase: &str,
        resource_type: &str,
        kind: ResourceKind,
        nodes: &[GraphNode],
        run: &mut ImportRun,
    ) -> Result<()> {
        for batch in nodes.chunks(self.options.batch_size.max(1)) {
            self.check_cancel()?;
            match self.upsert_with_retry(batch).await {
                Ok(counters) => {
                    run.summary.add_nodes(resource_type, counters);
                    for node in batch {
                        run.index.insert(&node.id, kind);
                    }
                }
                Err(e) if aborts_phase(&e) => return Err(e),
                Err(e) => {
                    log::warn!(
                        "{phase}: batch of {} {resource_type} failed twice ({e}), writing one by one",
                        batch.len()
                    );
                    for node in batch {
                        match self.store.upsert_nodes(std::slice::from_ref(node)).await {
                            Ok(counters) => {
                                run.summary.add_nodes(resource_type, counters);
                                run.index.insert(&node.id, kind);
                            }
                            Err(e) if aborts_phase(&e) => return Err(e),
                            Err(e) => {
                                log::error!("{phase}: node {} not written: {e}", node.id);
                                run.summary.add_errors(phase, 1);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn upsert_with_retry(&self, batch: &[GraphNode]) -> Result<WriteCounters> {
        match self.store.upsert_nodes(batch).await {
            Err(e) if !aborts_phase(&e) => {
                log::warn!("node batch failed, retrying once: {e}");
                self.store.upsert_nodes(batch).await
            }
            other => other,
        }
    }

    async fn write_edges(
        &self,
        spec: &EdgeSpec,
        edges: &[GraphEdge],
        summary: &mut ImportSummary,
    ) -> Result<()> {
        let rel = spec.rel;
        for batch in edges.chunks(self.options.batch_size.max(1)) {
            self.check_cancel()?;
            let first = match self.store.merge_edges(rel, batch).await {
                Err(e) if !aborts_phase(&e) => {
                    log::warn!("{spec} batch failed, retrying once: {e}");
                    self.store.merge_edges(rel, batch).await
                }
                other => other,
            };
            match first {
                Ok(counters) => {
                    let counts = summary.edges(rel.as_str());
                    counts.written += counters.written;
                    counts.created += counters.created;
                }
                Err(e) if aborts_phase(&e) => return Err(e),
                Err(e) => {
                    log::warn!("{spec}: batch failed twice ({e}), writing one by one");
                    for edge in batch {
                        match self.store.merge_edges(rel, std::slice::from_ref(edge)).await {
                            Ok(counters) => {
                                let counts = summary.edges(rel.as_str());
                                counts.written += counters.written;
                                counts.created += counters.created;
                            }
                            Err(e) if aborts_phase(&e) => return Err(e),
                            Err(e) => {
                                log::error!("{spec}: {} -> {} not written: {e}", edge.source, edge.target);
                                summary.edges(rel.as_str()).failed += 1;
                                summary.add_errors(rel.as_str(), 1);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryStore, RelType};
    use crate::processing::{normalize_all, ServiceTagResolver};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    const SUB: &str = "/subscriptions/s1/resourceGroups/rg/providers";

    fn rid(path: &str) -> String {
        format!("{SUB}/{path}")
    }

    fn rec(value: Value) -> ResourceRecord {
        ResourceRecord::from_value(value).unwrap()
    }

    /// VNet with one subnet, NSG with one custom rule, NIC + public IP + VM.
    fn topology() -> Vec<ResourceRecord> {
        let mut records = vec![
            rec(json!({
                "id": rid("Microsoft.Network/virtualNetworks/v1"),
                "name": "v1",
                "type": "microsoft.network/virtualnetworks",
                "subscriptionId": "s1",
                "properties": {
                    "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
                    "subnets": [{
                        "id": rid("Microsoft.Network/virtualNetworks/v1/subnets/web"),
                        "name": "web",
                        "properties": {
                            "addressPrefix": "10.0.1.0/24",
                            "networkSecurityGroup": {"id": rid("Microsoft.Network/networkSecurityGroups/n1")}
                        }
                    }]
                }
            })),
            rec(json!({
                "id": rid("Microsoft.Network/networkSecurityGroups/n1"),
                "name": "n1",
                "type": "microsoft.network/networksecuritygroups",
                "properties": {"securityRules": [{
                    "name": "allow-rdp",
                    "properties": {
                        "priority": 100,
                        "direction": "Inbound",
                        "access": "Allow",
                        "protocol": "Tcp",
                        "sourceAddressPrefix": "*",
                        "destinationAddressPrefix": "*",
                        "destinationPortRange": "3389"
                    }
                }]}
            })),
            rec(json!({
                "id": rid("Microsoft.Network/networkInterfaces/nic1"),
                "name": "nic1",
                "type": "microsoft.network/networkinterfaces",
                "properties": {
                    "networkSecurityGroup": {"id": rid("Microsoft.Network/networkSecurityGroups/n1")},
                    "ipConfigurations": [{"properties": {
                        "primary": true,
                        "privateIPAddress": "10.0.1.4",
                        "subnet": {"id": rid("Microsoft.Network/virtualNetworks/v1/subnets/web")},
                        "publicIPAddress": {"id": rid("Microsoft.Network/publicIPAddresses/pip1")}
                    }}]
                }
            })),
            rec(json!({
                "id": rid("Microsoft.Network/publicIPAddresses/pip1"),
                "name": "pip1",
                "type": "microsoft.network/publicipaddresses",
                "properties": {
                    "ipAddress": "20.1.2.3",
                    "ipConfiguration": {"id": rid("Microsoft.Network/networkInterfaces/nic1/ipConfigurations/ipconfig1")}
                }
            })),
            rec(json!({
                "id": rid("Microsoft.Compute/virtualMachines/vm1"),
                "name": "vm1",
                "type": "microsoft.compute/virtualmachines",
                "properties": {"networkProfile": {"networkInterfaces": [
                    {"id": rid("Microsoft.Network/networkInterfaces/nic1")}
                ]}}
            })),
        ];
        let mut resolver = ServiceTagResolver::with_defaults();
        normalize_all(&mut records, &mut resolver, true);
        records
    }

    fn importer(store: &MemoryStore) -> Importer<'_, MemoryStore> {
        Importer::new(store, ImportOptions::default(), Cancel::new())
    }

    #[tokio::test]
    async fn test_import_topology() {
        let store = MemoryStore::new();
        let summary = importer(&store).import(&topology()).await.unwrap();
        let g = store.snapshot();

        // 5 resources + 1 subnet + 7 rules (1 custom, 6 default) + Internet
        assert_eq!(g.nodes.len(), 14);
        assert!(g.schema_ready);
        assert_eq!(summary.records, 5);
        assert!(!summary.has_errors());

        let subnet = rid("Microsoft.Network/virtualNetworks/v1/subnets/web");
        let nic = rid("Microsoft.Network/networkInterfaces/nic1");
        let nsg = rid("Microsoft.Network/networkSecurityGroups/n1");
        let pip = rid("Microsoft.Network/publicIPAddresses/pip1");
        assert_eq!(g.edges_from(RelType::Contains, &rid("Microsoft.Network/virtualNetworks/v1")), vec![subnet.clone()]);
        assert_eq!(g.edges_from(RelType::In, &nic), vec![subnet.clone()]);
        let mut protected = g.edges_from(RelType::Protects, &nsg);
        protected.sort();
        let mut expected = vec![nic.clone(), subnet.clone()];
        expected.sort();
        assert_eq!(protected, expected);
        assert_eq!(g.edges_from(RelType::Uses, &nic), vec![pip.clone()]);
        assert_eq!(g.edges_from(RelType::Exposes, &pip), vec![nic.clone()]);
        assert_eq!(g.edges_from(RelType::Exposes, INTERNET_ID), vec![pip.clone()]);
        assert_eq!(g.edges_from(RelType::HasRule, &nsg).len(), 7);

        let rdp = format!("{nsg}/rule/allow-rdp");
        assert_eq!(g.prop(&rdp, "isRisky"), Some(&json!(true)));
        assert_eq!(
            g.prop(&rdp, "riskReasons"),
            Some(&json!(["Source: Internet (0.0.0.0/0)", "Port 3389 (RDP) exposed"]))
        );
        assert_eq!(g.prop(&subnet, "vnetId"), Some(&json!(rid("Microsoft.Network/virtualNetworks/v1"))));
    }

    #[tokio::test]
    async fn test_reimport_converges() {
        let store = MemoryStore::new();
        let records = topology();
        importer(&store).import(&records).await.unwrap();
        let first = store.snapshot();
        let second = importer(&store).import(&records).await.unwrap();
        assert_eq!(store.snapshot(), first);
        assert_eq!(second.total_nodes().created, 0);
        assert_eq!(second.total_edges().created, 0);
    }

    #[tokio::test]
    async fn test_empty_input_leaves_internet_only() {
        let store = MemoryStore::new();
        let summary = importer(&store).import(&[]).await.unwrap();
        let g = store.snapshot();
        assert_eq!(g.nodes.len(), 1);
        assert!(g.nodes.contains_key(INTERNET_ID));
        assert!(g.edges.is_empty());
        assert_eq!(summary.total_edges(), EdgeCounts::default());
    }

    #[tokio::test]
    async fn test_dangling_subnet_reference() {
        let store = MemoryStore::new();
        let nic = rec(json!({
            "id": "/nic/orphan",
            "name": "orphan",
            "type": "microsoft.network/networkinterfaces",
            "subnetId": "/vnets/gone/subnets/a"
        }));
        let summary = importer(&store).import(&[nic]).await.unwrap();
        assert!(store.snapshot().edges_of(RelType::In).is_empty());
        assert_eq!(summary.relationships["IN"].endpoint_missing, 1);
        assert_eq!(summary.relationships["IN"].written, 0);
    }

    #[tokio::test]
    async fn test_ids_match_ignoring_case() {
        let store = MemoryStore::new();
        let mut records = topology();
        for r in records.iter_mut() {
            if let Some(subnet) = r.refs.subnet_id.as_mut() {
                *subnet = subnet.to_ascii_uppercase();
            }
        }
        let summary = importer(&store).import(&records).await.unwrap();
        let nic = rid("Microsoft.Network/networkInterfaces/nic1");
        assert_eq!(
            store.snapshot().edges_from(RelType::In, &nic),
            vec![rid("Microsoft.Network/virtualNetworks/v1/subnets/web")]
        );
        assert_eq!(summary.relationships["IN"].endpoint_missing, 0);
    }

    #[tokio::test]
    async fn test_duplicate_records_imported_once() {
        let store = MemoryStore::new();
        let mut records = topology();
        let mut dup = records[2].clone();
        dup.id = dup.id.to_ascii_uppercase();
        records.push(dup);
        let summary = importer(&store).import(&records).await.unwrap();
        assert_eq!(summary.duplicate_records, 1);
        assert_eq!(summary.records, 5);
    }

    #[tokio::test]
    async fn test_failed_batch_retried() {
        let store = MemoryStore::new();
        store.fail_next_node_writes(1);
        let summary = importer(&store).import(&topology()).await.unwrap();
        assert!(!summary.has_errors());
        assert_eq!(store.snapshot().nodes.len(), 14);
    }

    #[tokio::test]
    async fn test_rejected_node_degrades_to_items() {
        let store = MemoryStore::new();
        let nic = rid("Microsoft.Network/networkInterfaces/nic1");
        store.reject_node(&nic);
        let summary = importer(&store).import(&topology()).await.unwrap();
        let g = store.snapshot();
        assert!(!g.nodes.contains_key(&nic));
        assert_eq!(g.nodes.len(), 13);
        assert_eq!(summary.errors["resource nodes"], 1);
        assert!(summary.relationships["IN"].endpoint_missing >= 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops() {
        let store = MemoryStore::new();
        let cancel = Cancel::new();
        cancel.cancel();
        let err = Importer::new(&store, ImportOptions::default(), cancel)
            .import(&topology())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
