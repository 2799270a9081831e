//! Command line definition.

use crate::config::{self, GraphConnection, Settings};
use crate::error::{Error, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "azure-network-topology")]
#[command(about = "Collect Azure network topology and load it into a graph database")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Subscription id to scan; repeat for several. "all" scans every enabled one
    #[arg(short, long = "subscription", global = true, default_value = config::ALL_SUBSCRIPTIONS)]
    pub subscriptions: Vec<String>,

    /// Resolve NSG address prefixes and service tags to IP ranges
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    pub expand_service_tags: bool,

    #[arg(long, global = true, env = "GRAPH_URL")]
    pub graph_url: Option<String>,

    #[arg(long, global = true, env = "GRAPH_USER")]
    pub graph_user: Option<String>,

    #[arg(long, global = true, env = "GRAPH_PASSWORD", hide_env_values = true)]
    pub graph_password: Option<String>,

    /// Delete every node and constraint before importing
    #[arg(long, global = true)]
    pub clear_db: bool,

    /// Snapshot to read instead of scanning Azure
    #[arg(long, global = true)]
    pub data_file: Option<PathBuf>,

    /// Directory for JSON artifacts
    #[arg(short, long, global = true, default_value = config::DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Subscription batches scanned concurrently
    #[arg(long, global = true, default_value_t = config::DEFAULT_WORKERS)]
    pub workers: usize,

    #[arg(long, global = true, default_value_t = config::DEFAULT_SCAN_TIMEOUT_SECS)]
    pub scan_timeout_secs: u64,

    #[arg(long, global = true, default_value_t = config::DEFAULT_GRAPH_TIMEOUT_SECS)]
    pub graph_timeout_secs: u64,

    /// Import into an in-memory graph instead of the database
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// More log output (-v debug, -vv trace) when no log4rs.yml is present
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan Azure and write a snapshot
    Pull,
    /// Import a snapshot into the graph database
    Push,
    /// Scan Azure and import directly
    Sync,
    /// Report Internet exposure of NICs with a public IP
    Exposure,
    /// Check whether NSGs let one endpoint reach another
    Reach {
        /// Source NIC id or IP address
        #[arg(long)]
        from: String,
        /// Destination NIC id or IP address
        #[arg(long)]
        to: String,
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "tcp")]
        protocol: String,
    },
}

impl GlobalArgs {
    /// Validate and resolve into run settings.
    pub fn into_settings(self) -> Result<Settings> {
        if self.workers == 0 {
            return Err(Error::InvalidInput("--workers must be at least 1".into()));
        }
        let graph = match self.graph_url {
            None => None,
            Some(url) => Some(GraphConnection {
                url,
                user: self.graph_user.ok_or_else(|| {
                    Error::InvalidInput("--graph-user (or GRAPH_USER) is required with --graph-url".into())
                })?,
                password: self.graph_password.ok_or_else(|| {
                    Error::InvalidInput(
                        "--graph-password (or GRAPH_PASSWORD) is required with --graph-url".into(),
                    )
                })?,
            }),
        };
        let subscriptions = self
            .subscriptions
            .iter()
            .flat_map(|s| s.split(','))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Settings {
            subscriptions,
            expand_service_tags: self.expand_service_tags,
            graph,
            clear_db: self.clear_db,
            data_file: self.data_file,
            output_dir: self.output,
            workers: self.workers,
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            graph_timeout: Duration::from_secs(self.graph_timeout_secs),
            dry_run: self.dry_run,
        })
    }
}
