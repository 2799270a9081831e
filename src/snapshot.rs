//! Snapshot files: collected records saved as JSON and read back for import.
//!
//! Accepted shapes:
//! - a direct array of records
//! - an object `{"network_topology": {"<subId>": {"network_resources": [...]}}}`
//! - an array wrapping such objects (what [`write_snapshot`] produces)
//!
//! `properties` may be an object or JSON encoded in a string.

use crate::error::{Error, Result};
use crate::models::ResourceRecord;
use crate::processing::{normalize_all, ServiceTagResolver};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

const TOPOLOGY_KEY: &str = "network_topology";
const RESOURCES_KEY: &str = "network_resources";

/// Records read from a snapshot, plus what was dropped on the way.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub records: Vec<ResourceRecord>,
    pub dropped: usize,
    /// Records that had no normalized fields and were normalized on load.
    pub backfilled: usize,
}

/// Read and decode a snapshot file.
///
/// # Arguments
/// * `path` - Snapshot file
/// * `resolver` - Receives the snapshot's VNet ranges during backfill
/// * `expand_service_tags` - Resolve NSG rules of backfilled records
///
/// # Returns
/// * `Err(Error::InvalidInput)` - The file is not one of the accepted shapes
pub fn read_snapshot(
    path: &Path,
    resolver: &mut ServiceTagResolver,
    expand_service_tags: bool,
) -> Result<Snapshot> {
    log::info!("reading snapshot {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidInput(format!("cannot read snapshot {}: {e}", path.display()))
    })?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidInput(format!("snapshot {} is not JSON: {e}", path.display())))?;
    let mut snapshot = decode_snapshot(value)?;
    snapshot.backfilled = backfill(&mut snapshot.records, resolver, expand_service_tags);
    log::info!(
        "snapshot: {} records, {} dropped, {} normalized on load",
        snapshot.records.len(),
        snapshot.dropped,
        snapshot.backfilled
    );
    Ok(snapshot)
}

/// Flatten any accepted shape into records. Rows that fail to decode are dropped.
pub fn decode_snapshot(value: Value) -> Result<Snapshot> {
    let rows = flatten(value)?;
    let mut snapshot = Snapshot::default();
    for row in rows {
        match ResourceRecord::from_value(row) {
            Ok(record) => snapshot.records.push(record),
            Err(e) => {
                log::debug!("snapshot row dropped: {e}");
                snapshot.dropped += 1;
            }
        }
    }
    Ok(snapshot)
}

fn flatten(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Object(mut obj) => match obj.remove(TOPOLOGY_KEY) {
            Some(topology) => topology_rows(topology),
            None => Err(Error::InvalidInput(format!(
                "snapshot object has no '{TOPOLOGY_KEY}' key"
            ))),
        },
        Value::Array(items) => {
            let wrapped = items
                .first()
                .and_then(Value::as_object)
                .is_some_and(|o| o.contains_key(TOPOLOGY_KEY));
            if !wrapped {
                return Ok(items);
            }
            let mut rows = Vec::new();
            for item in items {
                rows.extend(flatten(item)?);
            }
            Ok(rows)
        }
        other => Err(Error::InvalidInput(format!(
            "snapshot must be an array or an object, got {}",
            type_name(&other)
        ))),
    }
}

/// Rows of every subscription, subscriptions in key order.
fn topology_rows(topology: Value) -> Result<Vec<Value>> {
    let Value::Object(subscriptions) = topology else {
        return Err(Error::InvalidInput(format!(
            "'{TOPOLOGY_KEY}' must be an object keyed by subscription"
        )));
    };
    let sorted: BTreeMap<String, Value> = subscriptions.into_iter().collect();
    let mut rows = Vec::new();
    for (sub_id, mut data) in sorted {
        match data.get_mut(RESOURCES_KEY).map(Value::take) {
            Some(Value::Array(resources)) => {
                log::debug!("subscription {sub_id}: {} resources", resources.len());
                rows.extend(resources);
            }
            _ => log::warn!("subscription {sub_id} has no '{RESOURCES_KEY}' array"),
        }
    }
    Ok(rows)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize records that were saved without normalized fields.
///
/// Every record takes part in VNet range registration, so NSG rules of a
/// backfilled record see the whole snapshot's address space.
fn backfill(
    records: &mut [ResourceRecord],
    resolver: &mut ServiceTagResolver,
    expand_service_tags: bool,
) -> usize {
    let raw: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.refs.is_empty())
        .map(|(i, _)| i)
        .collect();
    if raw.is_empty() {
        return 0;
    }
    let mut normalized = records.to_vec();
    normalize_all(&mut normalized, resolver, expand_service_tags);
    for &i in &raw {
        records[i] = normalized[i].clone();
    }
    raw.len()
}

/// Write `records` grouped by subscription, in the wrapped-array shape.
pub fn write_snapshot(path: &Path, records: &[ResourceRecord]) -> Result<()> {
    let mut by_sub: BTreeMap<&str, Vec<&ResourceRecord>> = BTreeMap::new();
    for record in records {
        by_sub
            .entry(record.subscription_id.as_str())
            .or_default()
            .push(record);
    }
    let mut topology = Map::new();
    for (sub_id, resources) in by_sub {
        let mut entry = Map::new();
        entry.insert(RESOURCES_KEY.to_string(), serde_json::to_value(resources)?);
        topology.insert(sub_id.to_string(), Value::Object(entry));
    }
    let mut wrapper = Map::new();
    wrapper.insert(TOPOLOGY_KEY.to_string(), Value::Object(topology));
    let doc = Value::Array(vec![Value::Object(wrapper)]);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(&doc)?)?;
    log::info!(
        "snapshot written: {} ({} records)",
        path.display(),
        records.len()
    );
    Ok(())
}
