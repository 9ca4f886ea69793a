use std::{sync::Arc, time::Duration};

use super::{
    client::KustoClient,
    config::AzureDataExplorerSettings,
    error::{CloseError, WriteError},
    ingestor::Ingestor,
    provisioner::TableProvisioner,
    registry::IngestorRegistry,
    router::{MetricRouter, TablePayload},
};
use crate::{
    codecs::JsonSerializerConfig,
    event::Metric,
    internal_events::{
        AzureDataExplorerCloseError, AzureDataExplorerClosed, AzureDataExplorerEncodingError,
        AzureDataExplorerIngestionError, AzureDataExplorerIngestionSent,
    },
    sinks::util::Deadline,
};

/// Delivers batches of metrics to Azure Data Explorer.
///
/// `write` may be called concurrently; every table gets a single ingestor no
/// matter how many writes race to create it.
pub struct AzureDataExplorerSink {
    client: Arc<dyn KustoClient>,
    router: MetricRouter,
    registry: IngestorRegistry,
    timeout: Duration,
}

impl AzureDataExplorerSink {
    pub fn new(settings: AzureDataExplorerSettings, client: Arc<dyn KustoClient>) -> Self {
        let provisioner = TableProvisioner::new(
            Arc::clone(&client),
            settings.database.clone(),
            settings.create_tables,
        );
        let registry = IngestorRegistry::new(
            Arc::clone(&client),
            provisioner,
            settings.database,
            settings.ingestion_type,
        );

        Self {
            client,
            router: MetricRouter::new(settings.grouping, JsonSerializerConfig.build()),
            registry,
            timeout: settings.timeout,
        }
    }

    /// Sends one batch.
    ///
    /// Every step of the call shares one deadline. Serialization and table
    /// provisioning failures abort the call. A rejected ingestion is logged
    /// and the remaining tables are still sent.
    pub async fn write(&self, metrics: Vec<Metric>) -> Result<(), WriteError> {
        let count = metrics.len();
        let payloads = match self.router.route(metrics) {
            Ok(payloads) => payloads,
            Err(error) => {
                emit!(AzureDataExplorerEncodingError {
                    error: &error,
                    count,
                });
                return Err(WriteError::Serialize { source: error });
            }
        };
        if payloads.is_empty() {
            return Ok(());
        }

        let deadline = Deadline::after(self.timeout);
        for (table, payload) in payloads {
            let ingestor = self.registry.get_or_create(&table, deadline).await?;
            submit(&table, &ingestor, payload, deadline).await;
        }

        Ok(())
    }

    /// Closes every ingestor and then the client, reporting all failures.
    pub async fn close(&self) -> Result<(), CloseError> {
        let mut errors = match self.registry.close().await {
            Ok(()) => Vec::new(),
            Err(error) => error.into_errors(),
        };
        if let Err(error) = self.client.close().await {
            emit!(AzureDataExplorerCloseError {
                resource: "client",
                error: &error,
            });
            errors.push(error);
        }

        CloseError::from_errors(errors)?;
        emit!(AzureDataExplorerClosed);
        Ok(())
    }
}

async fn submit(table: &str, ingestor: &Ingestor, payload: TablePayload, deadline: Deadline) {
    let byte_size = payload.bytes.len();
    let result = match deadline.run(ingestor.ingest(payload.bytes.as_ref())).await {
        Ok(result) => result,
        Err(error) => Err(error.into()),
    };

    match result {
        Ok(status) => emit!(AzureDataExplorerIngestionSent {
            table,
            count: payload.count,
            byte_size,
            status,
        }),
        Err(error) => emit!(AzureDataExplorerIngestionError {
            table,
            error: &error,
            count: payload.count,
        }),
    }
}
