//! Discovery and caching of the storage behind queued ingestion.
//!
//! The `.get ingestion resources` and `.get kusto identity token` management
//! commands, run against the cluster's ingestion endpoint, return the blob
//! containers and queues to use along with the token that authorizes the
//! cluster to read staged blobs.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use super::{auth::AzureDataExplorerAuth, http::post_mgmt};

/// How long discovered resources are reused before they are loaded again.
const RESOURCES_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Database the ingestion endpoint's management commands run against.
const INGESTION_MGMT_DATABASE: &str = "NetDefaultDB";

/// A blob container or queue, with the SAS token granting access to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct StorageEndpoint {
    /// URL without query string, e.g. `https://host.blob.core.windows.net/container`.
    pub base_url: String,
    /// SAS query string, without the leading `?`.
    pub sas_token: String,
}

#[derive(Clone, Debug)]
pub(super) struct IngestionResources {
    pub blob_endpoints: Vec<StorageEndpoint>,
    pub queue_endpoints: Vec<StorageEndpoint>,
    pub identity_token: String,
    loaded_at: Instant,
}

impl IngestionResources {
    fn is_stale(&self) -> bool {
        self.loaded_at.elapsed() >= RESOURCES_REFRESH_INTERVAL
    }
}

#[derive(Clone)]
pub(super) struct ResourceManager {
    auth: AzureDataExplorerAuth,
    http: reqwest::Client,
    ingestion_endpoint: Url,
    cached: Arc<RwLock<Option<IngestionResources>>>,
}

impl ResourceManager {
    pub(super) fn new(
        auth: AzureDataExplorerAuth,
        http: reqwest::Client,
        ingestion_endpoint: Url,
    ) -> Self {
        Self {
            auth,
            http,
            ingestion_endpoint,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns the cached resources, loading them first if stale or absent.
    pub(super) async fn get_resources(&self) -> crate::Result<IngestionResources> {
        {
            let cached = self.cached.read().await;
            if let Some(resources) = cached.as_ref().filter(|resources| !resources.is_stale()) {
                return Ok(resources.clone());
            }
        }

        let resources = self.load_resources().await?;
        *self.cached.write().await = Some(resources.clone());
        Ok(resources)
    }

    async fn load_resources(&self) -> crate::Result<IngestionResources> {
        let response = self.execute(".get ingestion resources").await?;
        let (blob_endpoints, queue_endpoints) = parse_storage_resources(&response)?;

        if blob_endpoints.is_empty() {
            return Err("No blob storage endpoints returned by the ingestion endpoint".into());
        }
        if queue_endpoints.is_empty() {
            return Err("No queue endpoints returned by the ingestion endpoint".into());
        }

        let response = self.execute(".get kusto identity token").await?;
        let identity_token = parse_identity_token(&response)?;

        info!(
            message = "Loaded ingestion resources.",
            blob_count = blob_endpoints.len(),
            queue_count = queue_endpoints.len(),
        );

        Ok(IngestionResources {
            blob_endpoints,
            queue_endpoints,
            identity_token,
            loaded_at: Instant::now(),
        })
    }

    async fn execute(&self, csl: &str) -> crate::Result<String> {
        post_mgmt(
            &self.http,
            &self.auth,
            &self.ingestion_endpoint,
            INGESTION_MGMT_DATABASE,
            csl,
        )
        .await
    }
}

/// First table of a management response.
fn rows(response: &str) -> crate::Result<Vec<Value>> {
    let mut json: Value = serde_json::from_str(response)
        .map_err(|error| format!("Failed to parse management response: {error}"))?;

    match json
        .get_mut("Tables")
        .and_then(|tables| tables.get_mut(0))
        .and_then(|table| table.get_mut("Rows"))
        .map(Value::take)
    {
        Some(Value::Array(rows)) => Ok(rows),
        _ => Err("Unexpected management response format".into()),
    }
}

/// Splits `.get ingestion resources` rows into blob containers and queues.
///
/// ```json
/// {"Tables": [{"Rows": [
///     ["TempStorage", "https://host.blob.core.windows.net/container?sas"],
///     ["SecuredReadyForAggregationQueue", "https://host.queue.core.windows.net/queue?sas"]
/// ]}]}
/// ```
fn parse_storage_resources(
    response: &str,
) -> crate::Result<(Vec<StorageEndpoint>, Vec<StorageEndpoint>)> {
    let mut blob_endpoints = Vec::new();
    let mut queue_endpoints = Vec::new();

    for row in rows(response)? {
        let (Some(kind), Some(uri)) = (
            row.get(0).and_then(Value::as_str),
            row.get(1).and_then(Value::as_str),
        ) else {
            continue;
        };
        let Some(endpoint) = parse_sas_url(uri) else {
            continue;
        };

        match kind {
            "TempStorage" => blob_endpoints.push(endpoint),
            "SecuredReadyForAggregationQueue" => queue_endpoints.push(endpoint),
            // Status and failure queues are not consumed.
            _ => {}
        }
    }

    Ok((blob_endpoints, queue_endpoints))
}

/// Reads the token out of `{"Tables": [{"Rows": [["<token>"]]}]}`.
fn parse_identity_token(response: &str) -> crate::Result<String> {
    rows(response)?
        .first()
        .and_then(|row| row.get(0))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| "Failed to extract identity token from management response".into())
}

fn parse_sas_url(url: &str) -> Option<StorageEndpoint> {
    let (base_url, sas_token) = url.split_once('?')?;
    Some(StorageEndpoint {
        base_url: base_url.to_owned(),
        sas_token: sas_token.to_owned(),
    })
}
