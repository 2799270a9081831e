//! Azure Resource Graph query execution.
//!
//! [`ResourceGraph`] is the seam the collector talks to; [`AzCliGraph`] backs it
//! with `az graph query` and `az account list`.

use super::cli;
use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::models::ResourceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Resource-graph query listing every network-relevant resource.
pub fn topology_query() -> String {
    let filter = ResourceKind::COLLECTED
        .iter()
        .map(|k| format!("type =~ \"{}\"", k.type_name()))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "Resources | where ({filter}) \
         | project id, name, type, location, resourceGroup, subscriptionId, properties, tags, sku, zones"
    )
}

/// One page request.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphRequest {
    pub subscriptions: Vec<String>,
    pub query: String,
    pub skip_token: Option<String>,
    pub page_size: u32,
}

/// One page of results, as printed by `az graph query`.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct GraphPage {
    /// Raw resource rows.
    #[serde(default)]
    pub data: Vec<Value>,
    /// Token for pagination (if more results available).
    pub skip_token: Option<String>,
    /// Total number of records matching the query.
    pub total_records: Option<u64>,
    /// Count of records in this response.
    #[serde(default)]
    pub count: i64,
}

#[async_trait]
pub trait ResourceGraph: Send + Sync {
    /// Fail early with [`Error::Auth`] when there is no usable credential.
    async fn verify_credentials(&self) -> Result<()> {
        Ok(())
    }

    /// Ids of every enabled subscription the credential can see.
    async fn list_subscriptions(&self) -> Result<Vec<String>>;

    /// Fetch one page.
    async fn query_page(&self, request: &GraphRequest) -> Result<GraphPage>;
}

/// [`ResourceGraph`] over the `az` command line.
#[derive(Debug, Clone)]
pub struct AzCliGraph {
    cancel: Cancel,
    timeout: Duration,
}

impl AzCliGraph {
    /// # Arguments
    /// * `cancel` - Run-wide cancellation handle passed to every `az` call
    /// * `timeout` - Deadline for a single `az` invocation
    pub fn new(cancel: Cancel, timeout: Duration) -> Self {
        AzCliGraph { cancel, timeout }
    }
}

#[async_trait]
impl ResourceGraph for AzCliGraph {
    async fn verify_credentials(&self) -> Result<()> {
        let out = cli::run("az account show --output json", &self.cancel, self.timeout)
            .await
            .map_err(|e| match e {
                Error::Auth(m) => Error::Auth(m),
                other => Error::Auth(other.to_string()),
            })?;
        let account: Value = serde_json::from_str(&out)?;
        log::info!(
            "using az login {} (tenant {})",
            account["user"]["name"].as_str().unwrap_or("?"),
            account["tenantId"].as_str().unwrap_or("?")
        );
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>> {
        let args: Vec<String> = [
            "account",
            "list",
            "--query",
            "[?state=='Enabled'].id",
            "--output",
            "json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let out = cli::run_args("az", &args, &self.cancel, self.timeout).await?;
        let mut de = serde_json::Deserializer::from_str(&out);
        let ids: Vec<String> = serde_path_to_error::deserialize(&mut de)
            .map_err(|e| Error::Parse(format!("subscription list: path={} error={}", e.path(), e)))?;
        log::info!("found {} enabled subscriptions", ids.len());
        Ok(ids)
    }

    async fn query_page(&self, request: &GraphRequest) -> Result<GraphPage> {
        let mut args: Vec<String> = vec![
            "graph".into(),
            "query".into(),
            "-q".into(),
            request.query.clone(),
            "--first".into(),
            request.page_size.to_string(),
        ];
        if !request.subscriptions.is_empty() {
            args.push("--subscriptions".into());
            args.extend(request.subscriptions.iter().cloned());
        }
        if let Some(token) = &request.skip_token {
            args.push("--skip-token".into());
            args.push(token.clone());
        }
        args.extend(["--output".to_string(), "json".to_string()]);

        let output = cli::run_args("az", &args, &self.cancel, self.timeout).await?;
        parse_page(&output)
    }
}

/// Decode `az graph query` output, reporting the JSON path on failure.
pub fn parse_page(output: &str) -> Result<GraphPage> {
    let mut json_block_deserializer = serde_json::Deserializer::from_str(output);
    serde_path_to_error::deserialize(&mut json_block_deserializer).map_err(|e| {
        log::debug!("OUTPUT START:\n\n{}\n\nOUTPUT END\n", output);
        Error::Parse(format!("graph page: path={} error={}", e.path(), e))
    })
}
