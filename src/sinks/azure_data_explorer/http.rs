//! [`KustoClient`] over the cluster's REST API and Azure Storage.
//!
//! Management statements and streaming ingestion go to the engine endpoint.
//! Queued ingestion stages block blobs in the containers advertised by the
//! `ingest-` endpoint and notifies the cluster through its ingestion queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::{Engine as _, prelude::BASE64_STANDARD};
use bytes::Bytes;
use url::Url;
use uuid::Uuid;

use super::{
    auth::{AzureCredentials, AzureDataExplorerAuth},
    client::{BlobLocation, IngestionProperties, KustoClient},
    resources::{ResourceManager, StorageEndpoint},
};

const STORAGE_API_VERSION: &str = "2019-12-12";
const CLIENT_NAME: &str = "adx-metrics-sink";
const ERROR_BODY_LIMIT: usize = 500;

pub struct HttpKustoClient {
    http: reqwest::Client,
    endpoint: Url,
    auth: AzureDataExplorerAuth,
    resources: ResourceManager,
    blob_index: AtomicUsize,
    queue_index: AtomicUsize,
    closed: AtomicBool,
}

impl HttpKustoClient {
    pub fn new(endpoint: Url, credentials: AzureCredentials) -> crate::Result<Self> {
        let http = reqwest::Client::builder().user_agent(CLIENT_NAME).build()?;
        let auth = AzureDataExplorerAuth::new(&credentials, &endpoint)?;
        let resources =
            ResourceManager::new(auth.clone(), http.clone(), ingestion_endpoint(&endpoint)?);

        Ok(Self {
            http,
            endpoint,
            auth,
            resources,
            blob_index: AtomicUsize::new(0),
            queue_index: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err("Azure Data Explorer client is closed".into())
        } else {
            Ok(())
        }
    }

    fn storage_request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-app", CLIENT_NAME)
            .header("x-ms-client-request-id", Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl KustoClient for HttpKustoClient {
    async fn execute_mgmt(&self, database: &str, statement: &str) -> crate::Result<()> {
        self.ensure_open()?;
        post_mgmt(&self.http, &self.auth, &self.endpoint, database, statement).await?;
        Ok(())
    }

    async fn stream_ingest(
        &self,
        properties: &IngestionProperties,
        payload: Bytes,
    ) -> crate::Result<()> {
        self.ensure_open()?;
        let url = streaming_url(&self.endpoint, properties)?;
        let token = self.auth.get_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("x-ms-app", CLIENT_NAME)
            .body(payload)
            .send()
            .await?;
        check_response(response, "Streaming ingestion").await?;
        Ok(())
    }

    async fn create_blob(&self, name: &str) -> crate::Result<BlobLocation> {
        self.ensure_open()?;
        let resources = self.resources.get_resources().await?;
        let container = round_robin(&resources.blob_endpoints, &self.blob_index);

        Ok(BlobLocation {
            base_url: container.base_url.clone(),
            name: name.to_owned(),
            sas_token: container.sas_token.clone(),
        })
    }

    async fn stage_block(
        &self,
        blob: &BlobLocation,
        block_id: &str,
        block: Bytes,
    ) -> crate::Result<()> {
        self.ensure_open()?;
        let mut url = Url::parse(&blob.uri())?;
        url.query_pairs_mut()
            .append_pair("comp", "block")
            .append_pair("blockid", block_id);

        let response = self
            .storage_request(reqwest::Method::PUT, url)
            .body(block)
            .send()
            .await?;
        check_response(response, "Staging blob block").await?;
        Ok(())
    }

    async fn commit_blob(&self, blob: &BlobLocation, block_ids: &[String]) -> crate::Result<()> {
        self.ensure_open()?;
        let mut url = Url::parse(&blob.uri())?;
        url.query_pairs_mut().append_pair("comp", "blocklist");

        let response = self
            .storage_request(reqwest::Method::PUT, url)
            .header("Content-Type", "application/xml")
            .body(block_list_xml(block_ids))
            .send()
            .await?;
        check_response(response, "Committing blob").await?;

        debug!(
            message = "Committed blob.",
            blob = %blob.url(),
            blocks = block_ids.len(),
        );
        Ok(())
    }

    async fn enqueue_ingestion(
        &self,
        blob: &BlobLocation,
        raw_data_size: usize,
        properties: &IngestionProperties,
    ) -> crate::Result<()> {
        self.ensure_open()?;
        let resources = self.resources.get_resources().await?;
        let queue = round_robin(&resources.queue_endpoints, &self.queue_index);
        let message = ingestion_message(
            &blob.uri(),
            raw_data_size,
            properties,
            &resources.identity_token,
        );
        let url = Url::parse(&format!("{}/messages?{}", queue.base_url, queue.sas_token))?;

        let response = self
            .storage_request(reqwest::Method::POST, url)
            .header("Content-Type", "application/atom+xml")
            .body(queue_message_xml(&message))
            .send()
            .await?;
        check_response(response, "Queue notification").await?;

        debug!(
            message = "Enqueued ingestion notification.",
            queue = %queue.base_url,
            table = %properties.table,
        );
        Ok(())
    }

    async fn release(&self, properties: &IngestionProperties) -> crate::Result<()> {
        // Ingestors share this client's connection pool and resource cache;
        // nothing is held per table.
        self.ensure_open()?;
        trace!(message = "Released ingestor.", table = %properties.table);
        Ok(())
    }

    async fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err("Azure Data Explorer client is already closed".into());
        }
        Ok(())
    }
}

/// Runs a management command and returns the raw JSON response.
pub(super) async fn post_mgmt(
    http: &reqwest::Client,
    auth: &AzureDataExplorerAuth,
    endpoint: &Url,
    database: &str,
    csl: &str,
) -> crate::Result<String> {
    let url = api_url(endpoint, &["v1", "rest", "mgmt"])?;
    let token = auth.get_token().await?;

    let response = http
        .post(url)
        .bearer_auth(token)
        .header("Accept", "application/json")
        .header("x-ms-app", CLIENT_NAME)
        .json(&serde_json::json!({ "db": database, "csl": csl }))
        .send()
        .await?;
    check_response(response, "Management command").await
}

/// Returns the response body, or an error carrying the status and the start
/// of the body.
pub(super) async fn check_response(
    response: reqwest::Response,
    action: &str,
) -> crate::Result<String> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(format!("{action} failed: HTTP {status} - {}", truncate_body(&body)).into())
    }
}

pub(super) fn truncate_body(body: &str) -> &str {
    body.char_indices()
        .nth(ERROR_BODY_LIMIT)
        .map_or(body, |(index, _)| &body[..index])
}

fn api_url(endpoint: &Url, segments: &[&str]) -> crate::Result<Url> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| format!("Endpoint {endpoint} cannot be used as a base URL"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn streaming_url(endpoint: &Url, properties: &IngestionProperties) -> crate::Result<Url> {
    let mut url = api_url(
        endpoint,
        &[
            "v1",
            "rest",
            "ingest",
            properties.database.as_str(),
            properties.table.as_str(),
        ],
    )?;
    url.query_pairs_mut()
        .append_pair("streamFormat", properties.format)
        .append_pair("mappingName", &properties.mapping_reference);
    Ok(url)
}

/// The data management endpoint of a cluster lives next to the engine,
/// under the same host name prefixed with `ingest-`.
fn ingestion_endpoint(endpoint: &Url) -> crate::Result<Url> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| format!("Endpoint {endpoint} has no host"))?;
    if host.starts_with("ingest-") {
        return Ok(endpoint.clone());
    }

    let mut url = endpoint.clone();
    url.set_host(Some(&format!("ingest-{host}")))?;
    Ok(url)
}

fn round_robin<'a>(endpoints: &'a [StorageEndpoint], index: &AtomicUsize) -> &'a StorageEndpoint {
    &endpoints[index.fetch_add(1, Ordering::Relaxed) % endpoints.len()]
}

fn block_list_xml(block_ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in block_ids {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

fn ingestion_message(
    blob_uri: &str,
    raw_data_size: usize,
    properties: &IngestionProperties,
    identity_token: &str,
) -> String {
    serde_json::json!({
        "Id": Uuid::new_v4().to_string(),
        "BlobPath": blob_uri,
        "RawDataSize": raw_data_size,
        "DatabaseName": properties.database,
        "TableName": properties.table,
        "ApplicationForTracing": CLIENT_NAME,
        "AdditionalProperties": {
            "format": properties.format,
            "authorizationContext": identity_token,
            "jsonMappingReference": properties.mapping_reference,
        },
    })
    .to_string()
}

fn queue_message_xml(message: &str) -> String {
    format!(
        "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
        BASE64_STANDARD.encode(message)
    )
}
