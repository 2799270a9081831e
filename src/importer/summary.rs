use crate::graph::WriteCounters;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-relationship-type counters.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeCounts {
    pub written: u64,
    pub created: u64,
    /// Candidates dropped because an endpoint was not imported.
    pub endpoint_missing: u64,
    pub failed: u64,
}

/// Structured result of one import run, written as `import-summary.json`.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub started_at: String,
    pub finished_at: String,
    pub records: usize,
    /// Records whose id repeats an earlier one, ignoring case.
    pub duplicate_records: usize,
    /// Keyed by lower-case resource type.
    pub nodes: BTreeMap<String, WriteCounters>,
    /// Keyed by relationship type name.
    pub relationships: BTreeMap<String, EdgeCounts>,
    /// Failed writes per phase.
    pub errors: BTreeMap<String, u64>,
}

impl ImportSummary {
    pub fn add_nodes(&mut self, resource_type: &str, counters: WriteCounters) {
        *self.nodes.entry(resource_type.to_string()).or_default() += counters;
    }

    pub fn edges(&mut self, rel: &str) -> &mut EdgeCounts {
        self.relationships.entry(rel.to_string()).or_default()
    }

    pub fn add_errors(&mut self, phase: &str, count: u64) {
        if count > 0 {
            *self.errors.entry(phase.to_string()).or_default() += count;
        }
    }

    pub fn total_nodes(&self) -> WriteCounters {
        let mut total = WriteCounters::default();
        for counters in self.nodes.values() {
            total += *counters;
        }
        total
    }

    pub fn total_edges(&self) -> EdgeCounts {
        self.relationships
            .values()
            .fold(EdgeCounts::default(), |acc, c| EdgeCounts {
                written: acc.written + c.written,
                created: acc.created + c.created,
                endpoint_missing: acc.endpoint_missing + c.endpoint_missing,
                failed: acc.failed + c.failed,
            })
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut s = ImportSummary::default();
        s.add_nodes("a", WriteCounters { written: 2, created: 1 });
        s.add_nodes("a", WriteCounters { written: 1, created: 1 });
        s.add_nodes("b", WriteCounters { written: 4, created: 0 });
        assert_eq!(s.total_nodes(), WriteCounters { written: 7, created: 2 });
        assert_eq!(s.nodes["a"], WriteCounters { written: 3, created: 2 });

        s.edges("IN").endpoint_missing += 1;
        s.edges("IN").written += 3;
        s.edges("USES").written += 2;
        let total = s.total_edges();
        assert_eq!(total.written, 5);
        assert_eq!(total.endpoint_missing, 1);
    }

    #[test]
    fn test_errors_skip_zero() {
        let mut s = ImportSummary::default();
        s.add_errors("nodes", 0);
        assert!(!s.has_errors());
        s.add_errors("nodes", 2);
        assert_eq!(s.errors["nodes"], 2);
    }

    #[test]
    fn test_serialized_shape() {
        let mut s = ImportSummary::default();
        s.edges("HAS_RULE").created = 6;
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["relationships"]["HAS_RULE"]["created"], 6);
        assert_eq!(v["relationships"]["HAS_RULE"]["endpointMissing"], 0);
        assert!(v.get("startedAt").is_some());
    }
}
