//! Bolt-backed [`GraphStore`].
//!
//! Batches are sent as a single `UNWIND $rows` statement, so each batch is one
//! implicit transaction. `created` counts come from an `OPTIONAL MATCH` taken
//! before the `MERGE`.

use super::{
    GraphEdge, GraphNode, GraphStore, RelType, WriteCounters, INTERNET_DESCRIPTION, INTERNET_ID,
    INTERNET_NAME,
};
use crate::cancel::{guarded, Cancel};
use crate::config::GraphConnection;
use crate::error::{Error, Result};
use async_trait::async_trait;
use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, Graph, Query, Row};
use serde_json::{Map, Value};
use std::time::Duration;

const SCHEMA_STATEMENTS: [&str; 4] = [
    "CREATE CONSTRAINT resource_unique_id IF NOT EXISTS FOR (r:Resource) REQUIRE r.id IS UNIQUE",
    "CREATE INDEX resource_type_idx IF NOT EXISTS FOR (r:Resource) ON (r.resourceType)",
    "CREATE INDEX resource_name_idx IF NOT EXISTS FOR (r:Resource) ON (r.name)",
    "CREATE INDEX resource_location_idx IF NOT EXISTS FOR (r:Resource) ON (r.location)",
];

const UPSERT_NODES: &str = "UNWIND $rows AS row
     OPTIONAL MATCH (existing:Resource {id: row.id})
     WITH row, existing IS NULL AS isNew
     MERGE (r:Resource {id: row.id})
     SET r += row.props
     RETURN count(r) AS written, sum(CASE WHEN isNew THEN 1 ELSE 0 END) AS created";

const UPSERT_INTERNET: &str = "OPTIONAL MATCH (existing:Resource {id: $id})
     WITH existing IS NULL AS isNew
     MERGE (i:Resource {id: $id})
     SET i:Internet, i.name = $name, i.resourceType = $name, i.description = $description
     RETURN count(i) AS written, sum(CASE WHEN isNew THEN 1 ELSE 0 END) AS created";

/// MERGE statement for one relationship type.
fn merge_edges_cypher(rel: RelType) -> String {
    let arrow = if rel.is_undirected() { "" } else { ">" };
    format!(
        "UNWIND $rows AS row
         MATCH (s:Resource {{id: row.source}})
         MATCH (t:Resource {{id: row.target}})
         OPTIONAL MATCH (s)-[existing:{rel}]-{arrow}(t)
         WITH s, t, count(existing) = 0 AS isNew
         MERGE (s)-[:{rel}]-{arrow}(t)
         RETURN count(*) AS written, sum(CASE WHEN isNew THEN 1 ELSE 0 END) AS created",
        rel = rel.as_str()
    )
}

/// Convert a JSON value to a Bolt parameter.
pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => {
            BoltType::List(BoltList::from(items.iter().map(to_bolt).collect::<Vec<_>>()))
        }
        Value::Object(map) => BoltType::Map(to_bolt_map(map)),
    }
}

fn to_bolt_map(map: &Map<String, Value>) -> BoltMap {
    let mut out = BoltMap::new();
    for (k, v) in map {
        out.put(BoltString::from(k.as_str()), to_bolt(v));
    }
    out
}

fn map_neo4j_error(e: neo4rs::Error) -> Error {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("unauthorized") || lower.contains("authentication") {
        Error::Auth(message)
    } else if lower.contains("connection") || lower.contains("io error") || lower.contains("refused") {
        Error::Connectivity {
            service: "graph store",
            message,
        }
    } else {
        Error::Graph(message)
    }
}

fn counters_from(row: Option<Row>) -> WriteCounters {
    match row {
        Some(row) => WriteCounters {
            written: row.get::<i64>("written").unwrap_or(0).max(0) as u64,
            created: row.get::<i64>("created").unwrap_or(0).max(0) as u64,
        },
        None => WriteCounters::default(),
    }
}

pub struct Neo4jStore {
    graph: Graph,
    cancel: Cancel,
    timeout: Duration,
}

impl Neo4jStore {
    /// Open a Bolt connection pool.
    ///
    /// # Arguments
    /// * `conn` - URL and credentials
    /// * `cancel` - Run-wide cancellation handle, honored by every statement
    /// * `timeout` - Deadline for one statement
    pub async fn connect(conn: &GraphConnection, cancel: Cancel, timeout: Duration) -> Result<Self> {
        log::info!("connecting to graph store {}", conn.url);
        let graph = guarded(&cancel, timeout, "graph connect", async {
            Graph::new(conn.url.as_str(), conn.user.as_str(), conn.password.as_str())
                .await
                .map_err(|e| match map_neo4j_error(e) {
                    Error::Graph(message) => Error::Connectivity {
                        service: "graph store",
                        message,
                    },
                    other => other,
                })
        })
        .await?;
        Ok(Neo4jStore {
            graph,
            cancel,
            timeout,
        })
    }

    async fn run(&self, q: Query, label: &str) -> Result<()> {
        guarded(&self.cancel, self.timeout, label, async {
            self.graph.run(q).await.map_err(map_neo4j_error)
        })
        .await
    }

    async fn query_all(&self, q: Query, label: &str) -> Result<Vec<Row>> {
        guarded(&self.cancel, self.timeout, label, async {
            let mut stream = self.graph.execute(q).await.map_err(map_neo4j_error)?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await.map_err(map_neo4j_error)? {
                rows.push(row);
            }
            Ok(rows)
        })
        .await
    }

    async fn query_one(&self, q: Query, label: &str) -> Result<Option<Row>> {
        Ok(self.query_all(q, label).await?.into_iter().next())
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn verify_connectivity(&self) -> Result<()> {
        self.query_one(query("RETURN 1 AS ok"), "graph ping")
            .await
            .map_err(|e| match e {
                Error::Graph(message) => Error::Connectivity {
                    service: "graph store",
                    message,
                },
                other => other,
            })?;
        log::info!("graph store reachable");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let rows = self
            .query_all(query("SHOW CONSTRAINTS YIELD name RETURN name"), "list constraints")
            .await?;
        for row in rows {
            if let Ok(name) = row.get::<String>("name") {
                log::debug!("dropping constraint {name}");
                self.run(
                    query(&format!("DROP CONSTRAINT `{}` IF EXISTS", name.replace('`', ""))),
                    "drop constraint",
                )
                .await?;
            }
        }
        self.run(query("MATCH (n) DETACH DELETE n"), "delete all nodes")
            .await?;

        let left = self.count_nodes().await?;
        if left != 0 {
            return Err(Error::InvariantViolation(format!(
                "graph store not empty after clear: {left} nodes left"
            )));
        }
        log::info!("graph store cleared");
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            match self.run(query(statement), "schema").await {
                Ok(()) => log::debug!("schema ok: {statement}"),
                Err(Error::Graph(m))
                    if m.contains("already exists") || m.contains("EquivalentSchemaRule") =>
                {
                    log::debug!("schema already present: {statement}")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn upsert_internet(&self) -> Result<WriteCounters> {
        let q = query(UPSERT_INTERNET)
            .param("id", INTERNET_ID)
            .param("name", INTERNET_NAME)
            .param("description", INTERNET_DESCRIPTION);
        Ok(counters_from(self.query_one(q, "upsert internet").await?))
    }

    async fn upsert_nodes(&self, nodes: &[GraphNode]) -> Result<WriteCounters> {
        if nodes.is_empty() {
            return Ok(WriteCounters::default());
        }
        let rows: Vec<BoltType> = nodes
            .iter()
            .map(|n| {
                let mut row = BoltMap::new();
                row.put(BoltString::from("id"), BoltType::from(n.id.as_str()));
                row.put(BoltString::from("props"), BoltType::Map(to_bolt_map(&n.props)));
                BoltType::Map(row)
            })
            .collect();
        let q = query(UPSERT_NODES).param("rows", BoltType::List(BoltList::from(rows)));
        Ok(counters_from(self.query_one(q, "upsert nodes").await?))
    }

    async fn merge_edges(&self, rel: RelType, edges: &[GraphEdge]) -> Result<WriteCounters> {
        if edges.is_empty() {
            return Ok(WriteCounters::default());
        }
        let rows: Vec<BoltType> = edges
            .iter()
            .map(|e| {
                let mut row = BoltMap::new();
                row.put(BoltString::from("source"), BoltType::from(e.source.as_str()));
                row.put(BoltString::from("target"), BoltType::from(e.target.as_str()));
                BoltType::Map(row)
            })
            .collect();
        let q = query(&merge_edges_cypher(rel)).param("rows", BoltType::List(BoltList::from(rows)));
        Ok(counters_from(
            self.query_one(q, &format!("merge {rel}")).await?,
        ))
    }

    async fn count_nodes(&self) -> Result<u64> {
        let row = self
            .query_one(query("MATCH (n) RETURN count(n) AS cnt"), "count nodes")
            .await?;
        Ok(row
            .map(|r| r.get::<i64>("cnt").unwrap_or(0).max(0) as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_cypher_directed() {
        let q = merge_edges_cypher(RelType::HasRule);
        assert!(q.contains("MERGE (s)-[:HAS_RULE]->(t)"));
        assert!(q.contains("OPTIONAL MATCH (s)-[existing:HAS_RULE]->(t)"));
    }

    #[test]
    fn test_merge_cypher_undirected() {
        let q = merge_edges_cypher(RelType::PeeredWith);
        assert!(q.contains("MERGE (s)-[:PEERED_WITH]-(t)"));
        assert!(!q.contains("]->"));
    }

    #[test]
    fn test_to_bolt_shapes() {
        assert!(matches!(to_bolt(&json!(null)), BoltType::Null(_)));
        assert!(matches!(to_bolt(&json!(true)), BoltType::Boolean(_)));
        assert!(matches!(to_bolt(&json!(42)), BoltType::Integer(_)));
        assert!(matches!(to_bolt(&json!(1.5)), BoltType::Float(_)));
        assert!(matches!(to_bolt(&json!("x")), BoltType::String(_)));
        assert!(matches!(to_bolt(&json!(["a", "b"])), BoltType::List(_)));
        assert!(matches!(to_bolt(&json!({"k": 1})), BoltType::Map(_)));
    }

    #[test]
    fn test_schema_statements_are_idempotent() {
        assert!(SCHEMA_STATEMENTS.iter().all(|s| s.contains("IF NOT EXISTS")));
    }
}
