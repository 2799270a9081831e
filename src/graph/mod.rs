//! Property-graph store access.
//!
//! This module defines the [`GraphStore`] seam the importer writes through:
//! - [`neo4j`] - Bolt-backed store using `neo4rs`
//! - [`memory`] - In-process store for dry runs and tests
//!
//! Every write is a MERGE: running the same batch twice leaves the graph unchanged
//! and reports `created == 0` the second time.

mod memory;
mod neo4j;

pub use memory::{MemoryGraph, MemoryStore};
pub use neo4j::Neo4jStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::ops::AddAssign;

/// Key of the single Internet node.
pub const INTERNET_ID: &str = "internet";
pub const INTERNET_NAME: &str = "Internet";
pub const INTERNET_DESCRIPTION: &str = "External Internet connectivity";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    Contains,
    In,
    Protects,
    HasRule,
    Uses,
    Exposes,
    FrontendIp,
    BackendPool,
    ConnectsTo,
    PeeredWith,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Contains => "CONTAINS",
            RelType::In => "IN",
            RelType::Protects => "PROTECTS",
            RelType::HasRule => "HAS_RULE",
            RelType::Uses => "USES",
            RelType::Exposes => "EXPOSES",
            RelType::FrontendIp => "FRONTEND_IP",
            RelType::BackendPool => "BACKEND_POOL",
            RelType::ConnectsTo => "CONNECTS_TO",
            RelType::PeeredWith => "PEERED_WITH",
        }
    }

    /// Undirected types hold at most one edge per unordered pair.
    pub fn is_undirected(&self) -> bool {
        matches!(self, RelType::PeeredWith)
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `Resource` node: key plus flat attributes (scalars or lists of scalars).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub props: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

impl GraphEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        GraphEdge {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Endpoints in a fixed order, for undirected types.
    pub fn canonical(&self) -> GraphEdge {
        if self.source <= self.target {
            self.clone()
        } else {
            GraphEdge::new(self.target.clone(), self.source.clone())
        }
    }
}

/// What a write touched: `written` rows matched or merged, `created` of them new.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounters {
    pub written: u64,
    pub created: u64,
}

impl AddAssign for WriteCounters {
    fn add_assign(&mut self, other: WriteCounters) {
        self.written += other.written;
        self.created += other.created;
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Trivial round trip; fails with a connectivity or auth error.
    async fn verify_connectivity(&self) -> Result<()>;

    /// Drop constraints, delete every node and edge, and check the store is empty.
    async fn clear(&self) -> Result<()>;

    /// Unique key on `Resource.id`, indexes on `resourceType`, `name`, `location`.
    async fn ensure_schema(&self) -> Result<()>;

    /// Upsert the Internet node.
    async fn upsert_internet(&self) -> Result<WriteCounters>;

    /// Upsert one batch of nodes in a single transaction.
    async fn upsert_nodes(&self, nodes: &[GraphNode]) -> Result<WriteCounters>;

    /// Merge one batch of edges of a single type. Edges whose endpoints are absent
    /// are not written and not counted.
    async fn merge_edges(&self, rel: RelType, edges: &[GraphEdge]) -> Result<WriteCounters>;

    async fn count_nodes(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_names() {
        assert_eq!(RelType::HasRule.as_str(), "HAS_RULE");
        assert_eq!(RelType::FrontendIp.to_string(), "FRONTEND_IP");
        assert_eq!(serde_json::to_value(RelType::PeeredWith).unwrap(), "PEERED_WITH");
        assert!(RelType::PeeredWith.is_undirected());
        assert!(!RelType::Contains.is_undirected());
    }

    #[test]
    fn test_canonical_edge() {
        let e = GraphEdge::new("/vnets/b", "/vnets/a");
        assert_eq!(e.canonical(), GraphEdge::new("/vnets/a", "/vnets/b"));
        assert_eq!(e.canonical().canonical(), e.canonical());
    }

    #[test]
    fn test_counters_add() {
        let mut c = WriteCounters::default();
        c += WriteCounters { written: 3, created: 1 };
        c += WriteCounters { written: 2, created: 2 };
        assert_eq!(c, WriteCounters { written: 5, created: 3 });
    }
}
