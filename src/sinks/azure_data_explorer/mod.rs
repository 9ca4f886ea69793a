//! The Azure Data Explorer metrics sink.
//!
//! A batch is split into per-table payloads of newline delimited JSON
//! records. Each table is created on first use along with a JSON ingestion
//! mapping, then gets its own ingestor, which submits the table's payload
//! through queued or managed ingestion.

mod auth;
mod client;
mod config;
mod error;
mod http;
mod ingestor;
mod provisioner;
mod registry;
mod resources;
mod router;
mod sink;

#[cfg(test)]
mod test_util;

pub use self::{
    auth::{AzureAuthConfig, AzureCredentials},
    client::{BlobLocation, IngestionProperties, KustoClient, MULTIJSON_FORMAT, mapping_name},
    config::{
        AzureDataExplorerConfig, AzureDataExplorerSettings, BuildError, HEALTHCHECK_STATEMENT,
        IngestionType, MetricsGroupingType,
    },
    error::{CloseError, WriteError},
    http::HttpKustoClient,
    ingestor::{
        BUFFER_SIZE, IngestionStatus, Ingestor, IngestorError, MAX_BUFFERS, ManagedIngestor,
        QueuedIngestor, STREAMING_MAX_SIZE,
    },
    provisioner::{TableProvisioner, create_mapping_command, create_table_command},
    registry::IngestorRegistry,
    router::{MetricRouter, MetricsGrouping, TablePayload},
    sink::AzureDataExplorerSink,
};
