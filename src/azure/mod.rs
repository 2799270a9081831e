//! Azure CLI and Resource Graph interaction.
//!
//! This module handles all Azure-related operations:
//! - [`cli`] - Command execution for Azure CLI
//! - [`graph`] - Azure Resource Graph queries behind the [`ResourceGraph`] trait

mod cli;
mod graph;

// Re-export public types and functions
pub use cli::{classify_failure, run, run_args};
pub use graph::{
    parse_page, topology_query, AzCliGraph, GraphPage, GraphRequest,
    ResourceGraph,
};
