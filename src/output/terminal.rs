//! Terminal output utilities.
//!
//! Summary tables for import, collection, exposure and reachability runs.

use crate::analysis::{ExposureSummary, ReachResult};
use crate::importer::ImportSummary;
use crate::processing::{sensitive_service, CollectStats, ExposureLevel};
use colored::Colorize;

/// Format a value as a quoted, right-aligned field.
///
/// # Arguments
/// * `value` - The value to format
/// * `width` - The minimum width of the field
///
/// # Returns
/// A quoted, right-aligned string
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let value_str = value.to_string();
    let quoted = format!("\"{value_str}\"");
    let quoted_len = quoted.len();

    if quoted_len >= width {
        quoted
    } else {
        format!("{quoted:>width$}")
    }
}

/// Print node and relationship counters of an import.
pub fn print_import_summary(summary: &ImportSummary) {
    println!("{}", "# Import summary".on_blue());
    println!(
        r#"{kind},{written},{created}"#,
        kind = format_field("node type", 56),
        written = format_field("written", 10),
        created = format_field("created", 10)
    );
    for (kind, counters) in &summary.nodes {
        println!(
            "{},{},{}",
            format_field(kind, 56),
            format_field(counters.written, 10),
            format_field(counters.created, 10)
        );
    }
    println!(
        r#"{rel},{written},{created},{missing},{failed}"#,
        rel = format_field("relationship", 56),
        written = format_field("written", 10),
        created = format_field("created", 10),
        missing = format_field("missing", 10),
        failed = format_field("failed", 10)
    );
    for (rel, counts) in &summary.relationships {
        let missing = if counts.endpoint_missing > 0 {
            format_field(counts.endpoint_missing, 10).red().to_string()
        } else {
            format_field(counts.endpoint_missing, 10)
        };
        println!(
            "{},{},{},{},{}",
            format_field(rel, 56),
            format_field(counts.written, 10),
            format_field(counts.created, 10),
            missing,
            format_field(counts.failed, 10)
        );
    }
    if summary.duplicate_records > 0 {
        println!("#{}# {} duplicate records skipped", "NOTE".on_red(), summary.duplicate_records);
    }
    for (phase, count) in &summary.errors {
        println!("#{}# {phase}: {count} failed writes", "ERROR".on_red());
    }
}

pub fn print_collect_stats(stats: &CollectStats) {
    println!("{}", "# Collection summary".on_blue());
    println!(
        "subscriptions={} batches={} pages={} records={} parse_errors={} duplicate_ids={}",
        stats.subscriptions,
        stats.batches,
        stats.pages,
        stats.records,
        stats.parse_errors,
        stats.duplicate_ids
    );
    if !stats.failed_subscriptions.is_empty() {
        println!(
            "#{}# failed subscriptions: {}",
            "NOTE".on_red(),
            stats.failed_subscriptions.join(", ")
        );
    }
}

fn level_field(level: ExposureLevel) -> String {
    let field = format_field(format!("{level:?}"), 10);
    match level {
        ExposureLevel::Critical => field.on_red().to_string(),
        ExposureLevel::High => field.red().to_string(),
        _ => field,
    }
}

pub fn print_exposure(summary: &ExposureSummary) {
    println!("{}", "# Internet exposure".on_blue());
    println!(
        r#"{level},{name},{public_ip},{private_ip},{ports}"#,
        level = format_field("level", 10),
        name = format_field("nic", 32),
        public_ip = format_field("public_ip", 17),
        private_ip = format_field("private_ip", 17),
        ports = format_field("open_ports", 12)
    );
    for entry in &summary.resources {
        let ports = entry
            .report
            .open_ports
            .iter()
            .map(|p| if *p < 0 { "range".to_string() } else { p.to_string() })
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{},{},{},{},{}",
            level_field(entry.report.level),
            format_field(&entry.name, 32),
            format_field(entry.public_ip.as_deref().unwrap_or("-"), 17),
            format_field(entry.private_ip.as_deref().unwrap_or("-"), 17),
            format_field(ports, 12)
        );
        for rec in &entry.report.recommendations {
            println!("    -> {rec}");
        }
    }
}

pub fn print_reach(result: &ReachResult) {
    let verdict = if result.allowed {
        "ALLOWED".green()
    } else {
        "DENIED".on_red()
    };
    let service = sensitive_service(result.port)
        .map(|name| format!(" [{name}]"))
        .unwrap_or_default();
    println!(
        "{} ({}) -> {} ({}) {}/{}{service}: {verdict}",
        result.from, result.source_ip, result.to, result.dest_ip, result.port, result.protocol
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_field_short() {
        assert_eq!(format_field("test", 10), "    \"test\"");
    }

    #[test]
    fn test_format_field_exact() {
        assert_eq!(format_field("test", 6), "\"test\"");
    }

    #[test]
    fn test_format_field_long() {
        assert_eq!(format_field("long_value", 5), "\"long_value\"");
    }

    #[test]
    fn test_format_field_number() {
        assert_eq!(format_field(42, 6), "  \"42\"");
    }
}
