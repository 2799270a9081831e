//! Constants and run settings.

use std::path::PathBuf;
use std::time::Duration;

/// Max subscriptions per resource-graph query.
pub const SUBSCRIPTION_BATCH_SIZE: usize = 10;

/// Page size requested from the resource graph.
pub const GRAPH_PAGE_SIZE: u32 = 1000;

/// Nodes or edges per graph-store write.
pub const IMPORT_BATCH_SIZE: usize = 500;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_GRAPH_TIMEOUT_SECS: u64 = 120;

/// Pause between resource-graph pages, keeps us under the ARG throttling quota.
pub const PAGE_PAUSE_MSEC: u64 = 250;

/// Max size of a single `az` stdout we are prepared to parse.
pub const MAX_CLI_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

pub const DEFAULT_OUTPUT_DIR: &str = "./network-output";
pub const SNAPSHOT_FILE_NAME: &str = "network-topology-all-subscriptions.json";
pub const SUMMARY_FILE_NAME: &str = "import-summary.json";
pub const EXPOSURE_FILE_NAME: &str = "exposure-report.json";

/// Subscription selector meaning "every enabled subscription of the account".
pub const ALL_SUBSCRIPTIONS: &str = "all";

/// Connection details for the property-graph store.
#[derive(Debug, Clone, Default)]
pub struct GraphConnection {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// Everything a run needs, resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub subscriptions: Vec<String>,
    pub expand_service_tags: bool,
    pub graph: Option<GraphConnection>,
    pub clear_db: bool,
    pub data_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub scan_timeout: Duration,
    pub graph_timeout: Duration,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            subscriptions: vec![ALL_SUBSCRIPTIONS.to_string()],
            expand_service_tags: true,
            graph: None,
            clear_db: false,
            data_file: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            workers: DEFAULT_WORKERS,
            scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            graph_timeout: Duration::from_secs(DEFAULT_GRAPH_TIMEOUT_SECS),
            dry_run: false,
        }
    }
}

impl Settings {
    /// True when the caller asked for every enabled subscription.
    pub fn all_subscriptions(&self) -> bool {
        self.subscriptions.is_empty()
            || self
                .subscriptions
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ALL_SUBSCRIPTIONS))
    }

    /// Default snapshot location inside the output directory.
    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join(SNAPSHOT_FILE_NAME)
    }
}
