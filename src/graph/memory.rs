//! In-process [`GraphStore`] with the same MERGE semantics as the Bolt store.

use super::{
    GraphEdge, GraphNode, GraphStore, RelType, WriteCounters, INTERNET_DESCRIPTION, INTERNET_ID,
    INTERNET_NAME,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredNode {
    pub labels: BTreeSet<String>,
    pub props: Map<String, Value>,
}

/// Plain contents of a [`MemoryStore`]; comparable, so two imports can be diffed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryGraph {
    pub nodes: BTreeMap<String, StoredNode>,
    pub edges: BTreeSet<(RelType, String, String)>,
    pub schema_ready: bool,
}

impl MemoryGraph {
    pub fn edges_of(&self, rel: RelType) -> Vec<(String, String)> {
        self.edges
            .iter()
            .filter(|(r, _, _)| *r == rel)
            .map(|(_, s, t)| (s.clone(), t.clone()))
            .collect()
    }

    pub fn edges_from(&self, rel: RelType, source: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(r, s, _)| *r == rel && s == source)
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    pub fn prop(&self, id: &str, key: &str) -> Option<&Value> {
        self.nodes.get(id).and_then(|n| n.props.get(key))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: Mutex<MemoryGraph>,
    fail_next_node_writes: AtomicUsize,
    rejected_ids: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> MemoryGraph {
        self.lock().clone()
    }

    /// Make the next `n` node writes fail with a transient error.
    pub fn fail_next_node_writes(&self, n: usize) {
        self.fail_next_node_writes.store(n, Ordering::SeqCst);
    }

    /// Every node write containing `id` fails.
    pub fn reject_node(&self, id: &str) {
        if let Ok(mut ids) = self.rejected_ids.lock() {
            ids.insert(id.to_string());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryGraph> {
        self.graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn upsert(graph: &mut MemoryGraph, id: &str, labels: &[&str], props: &Map<String, Value>) -> bool {
        let created = !graph.nodes.contains_key(id);
        let node = graph.nodes.entry(id.to_string()).or_default();
        node.labels.extend(labels.iter().map(|l| l.to_string()));
        node.props.insert("id".into(), Value::String(id.to_string()));
        for (k, v) in props {
            if v.is_null() {
                node.props.remove(k);
            } else {
                node.props.insert(k.clone(), v.clone());
            }
        }
        created
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn verify_connectivity(&self) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut graph = self.lock();
        *graph = MemoryGraph::default();
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.lock().schema_ready = true;
        Ok(())
    }

    async fn upsert_internet(&self) -> Result<WriteCounters> {
        let mut props = Map::new();
        props.insert("name".into(), INTERNET_NAME.into());
        props.insert("resourceType".into(), INTERNET_NAME.into());
        props.insert("description".into(), INTERNET_DESCRIPTION.into());
        let created = Self::upsert(&mut self.lock(), INTERNET_ID, &["Resource", "Internet"], &props);
        Ok(WriteCounters {
            written: 1,
            created: created as u64,
        })
    }

    async fn upsert_nodes(&self, nodes: &[GraphNode]) -> Result<WriteCounters> {
        let pending_failures = self.fail_next_node_writes.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next_node_writes
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(Error::Transient("injected node write failure".into()));
        }
        if let Ok(rejected) = self.rejected_ids.lock() {
            if let Some(bad) = nodes.iter().find(|n| rejected.contains(&n.id)) {
                return Err(Error::Graph(format!("node {} rejected", bad.id)));
            }
        }

        let mut graph = self.lock();
        let mut counters = WriteCounters::default();
        for node in nodes {
            counters.written += 1;
            if Self::upsert(&mut graph, &node.id, &["Resource"], &node.props) {
                counters.created += 1;
            }
        }
        Ok(counters)
    }

    async fn merge_edges(&self, rel: RelType, edges: &[GraphEdge]) -> Result<WriteCounters> {
        let mut graph = self.lock();
        let mut counters = WriteCounters::default();
        for edge in edges {
            if !graph.nodes.contains_key(&edge.source) || !graph.nodes.contains_key(&edge.target) {
                continue;
            }
            let edge = if rel.is_undirected() {
                edge.canonical()
            } else {
                edge.clone()
            };
            counters.written += 1;
            if graph.edges.insert((rel, edge.source, edge.target)) {
                counters.created += 1;
            }
        }
        Ok(counters)
    }

    async fn count_nodes(&self) -> Result<u64> {
        Ok(self.lock().nodes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, props: Value) -> GraphNode {
        GraphNode {
            id: id.into(),
            props: props.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let batch = vec![node("a", json!({"name": "a"})), node("b", json!({"name": "b"}))];
        let first = store.upsert_nodes(&batch).await.unwrap();
        let second = store.upsert_nodes(&batch).await.unwrap();
        assert_eq!(first, WriteCounters { written: 2, created: 2 });
        assert_eq!(second, WriteCounters { written: 2, created: 0 });
        assert_eq!(store.count_nodes().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_attributes() {
        let store = MemoryStore::new();
        store.upsert_nodes(&[node("a", json!({"name": "old", "x": 1}))]).await.unwrap();
        store.upsert_nodes(&[node("a", json!({"name": "new", "x": null}))]).await.unwrap();
        let g = store.snapshot();
        assert_eq!(g.prop("a", "name"), Some(&json!("new")));
        assert_eq!(g.prop("a", "x"), None);
    }

    #[tokio::test]
    async fn test_edges_need_both_endpoints() {
        let store = MemoryStore::new();
        store.upsert_nodes(&[node("a", json!({})), node("b", json!({}))]).await.unwrap();
        let c = store
            .merge_edges(
                RelType::Contains,
                &[GraphEdge::new("a", "b"), GraphEdge::new("a", "missing")],
            )
            .await
            .unwrap();
        assert_eq!(c, WriteCounters { written: 1, created: 1 });
    }

    #[tokio::test]
    async fn test_undirected_edges_collapse() {
        let store = MemoryStore::new();
        store.upsert_nodes(&[node("a", json!({})), node("b", json!({}))]).await.unwrap();
        let c = store
            .merge_edges(
                RelType::PeeredWith,
                &[GraphEdge::new("a", "b"), GraphEdge::new("b", "a")],
            )
            .await
            .unwrap();
        assert_eq!(c, WriteCounters { written: 2, created: 1 });
        assert_eq!(store.snapshot().edges_of(RelType::PeeredWith).len(), 1);
    }

    #[tokio::test]
    async fn test_internet_node_and_clear() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert_internet().await.unwrap().created, 1);
        assert_eq!(store.upsert_internet().await.unwrap().created, 0);
        let g = store.snapshot();
        assert!(g.nodes[INTERNET_ID].labels.contains("Internet"));
        assert_eq!(g.prop(INTERNET_ID, "name"), Some(&json!("Internet")));
        store.clear().await.unwrap();
        assert_eq!(store.count_nodes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_next_node_writes(1);
        assert!(store.upsert_nodes(&[node("a", json!({}))]).await.is_err());
        assert!(store.upsert_nodes(&[node("a", json!({}))]).await.is_ok());
        store.reject_node("bad");
        assert!(store
            .upsert_nodes(&[node("ok", json!({})), node("bad", json!({}))])
            .await
            .is_err());
    }
}
