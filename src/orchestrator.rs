//! Run modes.
//!
//! - `pull` - collect from Azure, write a snapshot
//! - `push` - read a snapshot, import it
//! - `sync` - collect from Azure, import directly
//! - `exposure` - Internet exposure report from a snapshot or a live scan
//! - `reach` - NSG reachability between two endpoints
//!
//! Every mode shares one [`Cancel`] handle; a cancelled import leaves a partial
//! graph that the next run converges.

use crate::analysis::{exposure_report, reach, ExposureSummary, ReachResult, TopologyView};
use crate::azure::{AzCliGraph, ResourceGraph};
use crate::cancel::Cancel;
use crate::cli::Command;
use crate::config::{self, Settings};
use crate::error::{Error, Result};
use crate::graph::{GraphStore, MemoryStore, Neo4jStore};
use crate::importer::{ImportOptions, ImportSummary, Importer};
use crate::models::ResourceRecord;
use crate::output;
use crate::processing::{CollectOptions, Collector, RuleEvaluator, ServiceTagResolver};
use crate::snapshot::{read_snapshot, write_snapshot};
use colored::Colorize;
use std::path::PathBuf;

pub struct Orchestrator {
    settings: Settings,
    cancel: Cancel,
}

impl Orchestrator {
    pub fn new(settings: Settings, cancel: Cancel) -> Self {
        Orchestrator { settings, cancel }
    }

    /// Run `command` against the live `az` CLI where it needs Azure.
    pub async fn run(&self, command: &Command) -> Result<()> {
        let azure = AzCliGraph::new(self.cancel.clone(), self.settings.scan_timeout);
        match command {
            Command::Pull => {
                self.pull(&azure).await?;
            }
            Command::Push => {
                let summary = self.push().await?;
                output::print_import_summary(&summary);
            }
            Command::Sync => {
                let summary = self.sync(&azure).await?;
                output::print_import_summary(&summary);
            }
            Command::Exposure => {
                let report = self.exposure(&azure).await?;
                output::print_exposure(&report);
            }
            Command::Reach {
                from,
                to,
                port,
                protocol,
            } => {
                let result = self.reach(&azure, from, to, *port, protocol).await?;
                output::print_reach(&result);
            }
        }
        Ok(())
    }

    /// Collect every configured subscription and normalize the records.
    pub async fn collect(&self, graph: &dyn ResourceGraph) -> Result<Vec<ResourceRecord>> {
        let options = CollectOptions {
            expand_service_tags: self.settings.expand_service_tags,
            workers: self.settings.workers,
            scan_timeout: self.settings.scan_timeout,
            ..Default::default()
        };
        let mut resolver = ServiceTagResolver::new();
        let collection = Collector::new(graph, options)
            .collect(&self.settings.subscriptions, &mut resolver, &self.cancel)
            .await?;
        output::print_collect_stats(&collection.stats);
        Ok(collection.records)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.settings
            .data_file
            .clone()
            .unwrap_or_else(|| self.settings.snapshot_path())
    }

    fn load_snapshot(&self) -> Result<Vec<ResourceRecord>> {
        let mut resolver = ServiceTagResolver::with_defaults();
        let snapshot = read_snapshot(
            &self.snapshot_path(),
            &mut resolver,
            self.settings.expand_service_tags,
        )?;
        Ok(snapshot.records)
    }

    /// Records from `--data-file` when given, else from a live scan.
    async fn records(&self, graph: &dyn ResourceGraph) -> Result<Vec<ResourceRecord>> {
        match self.settings.data_file {
            Some(_) => self.load_snapshot(),
            None => self.collect(graph).await,
        }
    }

    pub async fn pull(&self, graph: &dyn ResourceGraph) -> Result<PathBuf> {
        log::info!("{}", "Pull: collecting network topology".on_blue());
        let records = self.collect(graph).await?;
        let path = self.settings.snapshot_path();
        write_snapshot(&path, &records)?;
        Ok(path)
    }

    pub async fn push(&self) -> Result<ImportSummary> {
        log::info!("{}", "Push: importing snapshot".on_blue());
        let records = self.load_snapshot()?;
        self.import(&records).await
    }

    pub async fn sync(&self, graph: &dyn ResourceGraph) -> Result<ImportSummary> {
        log::info!("{}", "Sync: collecting and importing".on_blue());
        let records = self.collect(graph).await?;
        self.import(&records).await
    }

    /// Import into the configured store and write `import-summary.json`.
    pub async fn import(&self, records: &[ResourceRecord]) -> Result<ImportSummary> {
        let summary = if self.settings.dry_run {
            log::info!("dry run: importing into memory");
            let store = MemoryStore::new();
            let summary = self.import_into(&store, records).await?;
            log::info!("dry run graph holds {} nodes", store.count_nodes().await?);
            summary
        } else {
            let conn = self.settings.graph.as_ref().ok_or_else(|| {
                Error::InvalidInput("--graph-url is required unless --dry-run is set".into())
            })?;
            let store =
                Neo4jStore::connect(conn, self.cancel.clone(), self.settings.graph_timeout).await?;
            self.import_into(&store, records).await?
        };
        output::write_json(&self.settings.output_dir, config::SUMMARY_FILE_NAME, &summary)?;
        Ok(summary)
    }

    async fn import_into<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        records: &[ResourceRecord],
    ) -> Result<ImportSummary> {
        let options = ImportOptions {
            clear_db: self.settings.clear_db,
            ..Default::default()
        };
        Importer::new(store, options, self.cancel.clone())
            .import(records)
            .await
    }

    pub async fn exposure(&self, graph: &dyn ResourceGraph) -> Result<ExposureSummary> {
        let records = self.records(graph).await?;
        let report = exposure_report(&records);
        output::write_json(&self.settings.output_dir, config::EXPOSURE_FILE_NAME, &report)?;
        Ok(report)
    }

    pub async fn reach(
        &self,
        graph: &dyn ResourceGraph,
        from: &str,
        to: &str,
        port: u16,
        protocol: &str,
    ) -> Result<ReachResult> {
        let records = self.records(graph).await?;
        let view = TopologyView::new(&records);
        reach(&view, &mut RuleEvaluator::new(), from, to, port, protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::{GraphPage, GraphRequest};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// One subscription, one page.
    struct OnePage(Vec<Value>);

    #[async_trait]
    impl ResourceGraph for OnePage {
        async fn list_subscriptions(&self) -> Result<Vec<String>> {
            Ok(vec!["s1".into()])
        }

        async fn query_page(&self, _request: &GraphRequest) -> Result<GraphPage> {
            Ok(GraphPage {
                count: self.0.len() as i64,
                data: self.0.clone(),
                skip_token: None,
                total_records: None,
            })
        }
    }

    fn rows() -> Vec<Value> {
        vec![
            json!({
                "id": "/subscriptions/s1/nics/n1", "name": "n1",
                "type": "microsoft.network/networkinterfaces", "subscriptionId": "s1",
                "properties": {"ipConfigurations": [{"properties": {
                    "privateIPAddress": "10.0.0.4",
                    "publicIPAddress": {"id": "/subscriptions/s1/pips/p1"}
                }}]}
            }),
            json!({
                "id": "/subscriptions/s1/pips/p1", "name": "p1",
                "type": "microsoft.network/publicipaddresses", "subscriptionId": "s1",
                "properties": {"ipAddress": "20.0.0.9"}
            }),
        ]
    }

    fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let settings = Settings {
            output_dir: dir.to_path_buf(),
            dry_run: true,
            ..Default::default()
        };
        Orchestrator::new(settings, Cancel::new())
    }

    #[tokio::test]
    async fn test_pull_then_push() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let path = orch.pull(&OnePage(rows())).await.unwrap();
        assert!(path.ends_with(config::SNAPSHOT_FILE_NAME));

        let summary = orch.push().await.unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.relationships["USES"].created, 1);
        assert_eq!(summary.relationships["EXPOSES"].created, 1);
        assert!(dir.path().join(config::SUMMARY_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_sync_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let summary = orchestrator(dir.path()).sync(&OnePage(rows())).await.unwrap();
        assert_eq!(summary.records, 2);
        assert!(!summary.has_errors());
    }

    #[tokio::test]
    async fn test_import_needs_graph_connection() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = Orchestrator::new(settings, Cancel::new())
            .import(&[])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_push_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let err = orchestrator(dir.path()).push().await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_exposure_live() {
        let dir = tempfile::tempdir().unwrap();
        let report = orchestrator(dir.path()).exposure(&OnePage(rows())).await.unwrap();
        assert_eq!(report.resources.len(), 1);
        assert_eq!(report.resources[0].public_ip.as_deref(), Some("20.0.0.9"));
        assert!(dir.path().join(config::EXPOSURE_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_reach_live() {
        let dir = tempfile::tempdir().unwrap();
        let result = orchestrator(dir.path())
            .reach(&OnePage(rows()), "8.8.8.8", "/subscriptions/s1/nics/n1", 22, "tcp")
            .await
            .unwrap();
        // no NSG anywhere: unfiltered
        assert!(result.allowed);
    }
}
