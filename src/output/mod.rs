//! Output formatting for run results.
//!
//! This module handles reporting results:
//! - [`terminal`] - Console tables with colors
//! - [`json`] - JSON artifacts in the output directory

mod json;
mod terminal;

pub use json::write_json;
pub use terminal::{format_field, print_collect_stats, print_exposure, print_import_summary, print_reach};
