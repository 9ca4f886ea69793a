//! The boundary between the sink and the remote store.
//!
//! Everything the sink needs from Azure Data Explorer goes through
//! [`KustoClient`]: raw management statements for provisioning, streaming
//! ingestion for the managed strategy, and the blob + queue primitives used by
//! queued ingestion. [`super::http::HttpKustoClient`] is the production
//! implementation.

use async_trait::async_trait;
use bytes::Bytes;

/// The only data format this sink produces.
pub const MULTIJSON_FORMAT: &str = "multijson";

/// Name of the JSON ingestion mapping provisioned for `table`.
pub fn mapping_name(table: &str) -> String {
    format!("{table}_mapping")
}

/// Where and how an ingestion job is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub format: &'static str,
    pub mapping_reference: String,
}

impl IngestionProperties {
    /// Properties for newline delimited JSON records bound through the
    /// table's `<table>_mapping` ingestion mapping.
    pub fn json(database: &str, table: &str) -> Self {
        Self {
            database: database.to_owned(),
            table: table.to_owned(),
            format: MULTIJSON_FORMAT,
            mapping_reference: mapping_name(table),
        }
    }
}

/// A blob staged for queued ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobLocation {
    /// Container URL without query string.
    pub base_url: String,
    pub name: String,
    /// SAS query string, without the leading `?`.
    pub sas_token: String,
}

impl BlobLocation {
    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.name)
    }

    /// Full blob URL including the SAS token.
    pub fn uri(&self) -> String {
        if self.sas_token.is_empty() {
            self.url()
        } else {
            format!("{}?{}", self.url(), self.sas_token)
        }
    }
}

/// Operations offered by an Azure Data Explorer cluster.
///
/// Implementations must be usable from many tasks at once. None of the
/// methods apply a timeout of their own; callers bound them with a
/// [`crate::sinks::util::Deadline`].
#[async_trait]
pub trait KustoClient: Send + Sync + 'static {
    /// Executes a management statement against `database`.
    ///
    /// Statements are passed through verbatim.
    async fn execute_mgmt(&self, database: &str, statement: &str) -> crate::Result<()>;

    /// Streams `payload` straight into the table described by `properties`.
    async fn stream_ingest(
        &self,
        properties: &IngestionProperties,
        payload: Bytes,
    ) -> crate::Result<()>;

    /// Picks a storage location for a new blob called `name`.
    async fn create_blob(&self, name: &str) -> crate::Result<BlobLocation>;

    /// Uploads one uncommitted block of `blob`.
    async fn stage_block(
        &self,
        blob: &BlobLocation,
        block_id: &str,
        block: Bytes,
    ) -> crate::Result<()>;

    /// Commits the staged blocks of `blob`, in order.
    async fn commit_blob(&self, blob: &BlobLocation, block_ids: &[String]) -> crate::Result<()>;

    /// Asks the cluster to load a committed blob.
    async fn enqueue_ingestion(
        &self,
        blob: &BlobLocation,
        raw_data_size: usize,
        properties: &IngestionProperties,
    ) -> crate::Result<()>;

    /// Releases whatever the connection keeps on behalf of one table's ingestor.
    async fn release(&self, properties: &IngestionProperties) -> crate::Result<()>;

    /// Closes the connection. Every later call fails.
    async fn close(&self) -> crate::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_properties_reference_table_mapping() {
        let properties = IngestionProperties::json("telemetry", "cpu");

        assert_eq!(properties.database, "telemetry");
        assert_eq!(properties.table, "cpu");
        assert_eq!(properties.format, "multijson");
        assert_eq!(properties.mapping_reference, "cpu_mapping");
    }

    #[test]
    fn blob_uri_appends_sas_token() {
        let blob = BlobLocation {
            base_url: "https://host.blob.core.windows.net/container".to_owned(),
            name: "payload.multijson".to_owned(),
            sas_token: "sv=2019&sig=abc".to_owned(),
        };

        assert_eq!(
            blob.uri(),
            "https://host.blob.core.windows.net/container/payload.multijson?sv=2019&sig=abc"
        );

        let blob = BlobLocation {
            sas_token: String::new(),
            ..blob
        };
        assert_eq!(
            blob.uri(),
            "https://host.blob.core.windows.net/container/payload.multijson"
        );
    }
}
