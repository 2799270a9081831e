//! Azure network topology collector and graph importer.
//!
//! - [`processing`] - resource graph collection, normalization, NSG rule evaluation
//! - [`importer`] - batched idempotent writes into a property graph
//! - [`analysis`] - Internet exposure and reachability over collected records
//! - [`orchestrator`] - the pull, push, sync, exposure and reach run modes

pub mod analysis;
pub mod azure;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod importer;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod processing;
pub mod snapshot;

pub use error::{Error, Result};
