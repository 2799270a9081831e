//! Topology collection from the Azure Resource Graph.
//!
//! Subscriptions are queried in batches of [`config::SUBSCRIPTION_BATCH_SIZE`],
//! each batch paginated by skip token strictly in order. A failed batch is
//! retried once when the failure looks transient, then split into one query per
//! subscription. Distinct batches run concurrently up to `workers`.

use super::normalize::{normalize, normalize_nsg, vnet_address_prefixes};
use super::service_tags::ServiceTagResolver;
use crate::azure::{topology_query, GraphRequest, ResourceGraph};
use crate::cancel::{guarded, Cancel};
use crate::config;
use crate::error::{Error, Result};
use crate::models::{ResourceKind, ResourceRecord};
use colored::Colorize;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub expand_service_tags: bool,
    pub workers: usize,
    /// Deadline for one batch, all pages included.
    pub scan_timeout: Duration,
    pub page_size: u32,
    pub page_pause: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions {
            expand_service_tags: true,
            workers: config::DEFAULT_WORKERS,
            scan_timeout: Duration::from_secs(config::DEFAULT_SCAN_TIMEOUT_SECS),
            page_size: config::GRAPH_PAGE_SIZE,
            page_pause: Duration::from_millis(config::PAGE_PAUSE_MSEC),
        }
    }
}

/// Counters reported at the end of a collection.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectStats {
    pub subscriptions: usize,
    pub batches: usize,
    pub pages: usize,
    pub records: usize,
    pub parse_errors: usize,
    pub duplicate_ids: usize,
    pub invalid_vnet_prefixes: usize,
    pub failed_subscriptions: Vec<String>,
}

/// Normalized records plus the counters of the run that produced them.
#[derive(Debug, Default)]
pub struct Collection {
    pub records: Vec<ResourceRecord>,
    pub stats: CollectStats,
}

impl IntoIterator for Collection {
    type Item = ResourceRecord;
    type IntoIter = std::vec::IntoIter<ResourceRecord>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    rows: Vec<Value>,
    pages: usize,
    failed: Vec<String>,
}

pub struct Collector<'a, G: ResourceGraph + ?Sized> {
    graph: &'a G,
    options: CollectOptions,
    query: String,
}

impl<'a, G: ResourceGraph + ?Sized> Collector<'a, G> {
    pub fn new(graph: &'a G, options: CollectOptions) -> Self {
        Collector {
            graph,
            options,
            query: topology_query(),
        }
    }

    /// Collect and normalize every network resource of `subscriptions`.
    ///
    /// # Arguments
    /// * `subscriptions` - Subscription ids; empty or `all` means every enabled one
    /// * `resolver` - Seeded and extended with tenant VNet ranges here
    /// * `cancel` - Run-wide cancellation handle
    ///
    /// # Returns
    /// * `Err(Error::Auth)` - No usable credential
    /// * `Err(Error::Cancelled)` - The run was cancelled
    /// * `Ok(Collection)` - Everything else; per-subscription failures are in the stats
    pub async fn collect(
        &self,
        subscriptions: &[String],
        resolver: &mut ServiceTagResolver,
        cancel: &Cancel,
    ) -> Result<Collection> {
        self.graph.verify_credentials().await?;

        let all = subscriptions.is_empty()
            || subscriptions
                .iter()
                .any(|s| s.eq_ignore_ascii_case(config::ALL_SUBSCRIPTIONS));
        let subscriptions = if all {
            self.graph.list_subscriptions().await?
        } else {
            subscriptions.to_vec()
        };

        let mut stats = CollectStats {
            subscriptions: subscriptions.len(),
            ..Default::default()
        };
        if subscriptions.is_empty() {
            log::warn!("no subscriptions to scan");
            return Ok(Collection {
                records: Vec::new(),
                stats,
            });
        }

        if self.options.expand_service_tags {
            resolver.update_service_tags();
        }

        let batches: Vec<Vec<String>> = subscriptions
            .chunks(config::SUBSCRIPTION_BATCH_SIZE)
            .map(<[String]>::to_vec)
            .collect();
        stats.batches = batches.len();
        log::info!(
            "scanning {} subscriptions in {} batches, {} workers",
            subscriptions.len(),
            batches.len(),
            self.options.workers
        );

        let outcomes: Vec<Result<BatchOutcome>> = stream::iter(batches.iter().enumerate())
            .map(|(i, batch)| self.collect_batch_with_fallback(i, batch, cancel))
            .buffered(self.options.workers.max(1))
            .collect()
            .await;

        let mut rows = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            stats.pages += outcome.pages;
            stats.failed_subscriptions.extend(outcome.failed);
            rows.extend(outcome.rows);
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut seen = HashSet::new();
        for row in rows {
            match ResourceRecord::from_value(row) {
                Ok(record) => {
                    if seen.insert(record.id.to_ascii_lowercase()) {
                        records.push(record);
                    } else {
                        log::debug!("duplicate resource {} ignored", record.id);
                        stats.duplicate_ids += 1;
                    }
                }
                Err(e) => {
                    log::debug!("skipping record: {e}");
                    stats.parse_errors += 1;
                }
            }
        }

        stats.invalid_vnet_prefixes = normalize_all(&mut records, resolver, self.options.expand_service_tags);
        stats.records = records.len();
        log::info!(
            "collected {} records ({} pages, {} parse errors, {} failed subscriptions)",
            stats.records,
            stats.pages,
            stats.parse_errors,
            stats.failed_subscriptions.len()
        );
        Ok(Collection { records, stats })
    }

    async fn collect_batch_with_fallback(
        &self,
        index: usize,
        batch: &[String],
        cancel: &Cancel,
    ) -> Result<BatchOutcome> {
        let first = self.collect_batch(index, batch, cancel).await;
        let err = match first {
            Ok(outcome) => return Ok(outcome),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => e,
        };

        if err.is_transient() {
            log::warn!("batch#{index} failed ({err}), retrying once");
            match self.collect_batch(index, batch, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => log::warn!("batch#{index} failed again: {e}"),
            }
        } else {
            log::warn!("batch#{index} failed: {err}");
        }

        if batch.len() == 1 {
            log::error!("{} subscription {}: {err}", "failed".on_red(), batch[0]);
            return Ok(BatchOutcome {
                failed: batch.to_vec(),
                ..Default::default()
            });
        }

        log::info!("batch#{index}: falling back to one query per subscription");
        let mut merged = BatchOutcome::default();
        for sub in batch {
            match self.collect_batch(index, std::slice::from_ref(sub), cancel).await {
                Ok(outcome) => {
                    merged.pages += outcome.pages;
                    merged.rows.extend(outcome.rows);
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    log::error!("{} subscription {sub}: {e}", "failed".on_red());
                    merged.failed.push(sub.clone());
                }
            }
        }
        Ok(merged)
    }

    async fn collect_batch(&self, index: usize, batch: &[String], cancel: &Cancel) -> Result<BatchOutcome> {
        guarded(
            cancel,
            self.options.scan_timeout,
            &format!("resource graph batch#{index}"),
            self.paginate(index, batch, cancel),
        )
        .await
    }

    async fn paginate(&self, index: usize, batch: &[String], cancel: &Cancel) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut request = GraphRequest {
            subscriptions: batch.to_vec(),
            query: self.query.clone(),
            skip_token: None,
            page_size: self.options.page_size,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let page = self.graph.query_page(&request).await?;
            let count = page.data.len();
            outcome.rows.extend(page.data);
            outcome.pages += 1;
            log::info!(
                "batch#{index:2} page#{:2} record_count=+{count:3} => {total:4} more={more}",
                outcome.pages,
                total = outcome.rows.len(),
                more = page.skip_token.is_some(),
            );

            match page.skip_token.filter(|t| !t.is_empty()) {
                None => break,
                Some(token) => {
                    if !seen_tokens.insert(token.clone()) {
                        return Err(Error::InvariantViolation(
                            "skip token not unique - possible infinite loop".into(),
                        ));
                    }
                    request.skip_token = Some(token);
                }
            }
            if !self.options.page_pause.is_zero() {
                tokio::time::sleep(self.options.page_pause).await;
            }
        }
        Ok(outcome)
    }
}

fn is_fatal(e: &Error) -> bool {
    matches!(e, Error::Auth(_) | Error::Cancelled)
}

/// Run the per-type normalizers over a full record set.
///
/// Non-NSG records first, then VNet prefixes are registered with the resolver,
/// then NSGs are resolved, so `VirtualNetwork` covers every tenant VNet no
/// matter the listing order.
///
/// # Returns
/// The number of VNet prefixes that were not valid CIDRs.
pub fn normalize_all(
    records: &mut [ResourceRecord],
    resolver: &mut ServiceTagResolver,
    expand_service_tags: bool,
) -> usize {
    for record in records.iter_mut() {
        normalize(record);
    }

    let mut invalid = 0;
    for record in records
        .iter()
        .filter(|r| r.kind() == ResourceKind::VirtualNetwork)
    {
        for prefix in vnet_address_prefixes(record) {
            if let Err(e) = resolver.add_vnet_range(&prefix) {
                log::warn!("vnet {}: {e}", record.name);
                invalid += 1;
            }
        }
    }

    if expand_service_tags {
        for record in records
            .iter_mut()
            .filter(|r| r.kind() == ResourceKind::NetworkSecurityGroup)
        {
            normalize_nsg(record, resolver);
        }
    }
    invalid
}
