use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OnceCell, RwLock};

use super::{
    IngestionType,
    client::{IngestionProperties, KustoClient},
    error::{CloseError, CreateIngestorSnafu, WriteError},
    ingestor::Ingestor,
    provisioner::TableProvisioner,
};
use crate::{
    internal_events::{
        AzureDataExplorerCloseError, AzureDataExplorerIngestorCreated,
        AzureDataExplorerProvisioningError,
    },
    sinks::util::Deadline,
};

type Slot = Arc<OnceCell<Arc<Ingestor>>>;

/// Lazily created ingestors, one per table.
///
/// The first caller for a table provisions it and builds its ingestor while
/// later callers for the same table wait for that result. Callers for other
/// tables are never held up. A failed creation leaves the table empty so the
/// next caller tries again.
///
/// Creation and [`IngestorRegistry::close`] exclude each other, so every
/// ingestor handed out is released by `close`.
pub struct IngestorRegistry {
    client: Arc<dyn KustoClient>,
    provisioner: TableProvisioner,
    database: String,
    ingestion_type: IngestionType,
    ingestors: DashMap<String, Slot>,
    closed: RwLock<bool>,
}

impl IngestorRegistry {
    pub fn new(
        client: Arc<dyn KustoClient>,
        provisioner: TableProvisioner,
        database: String,
        ingestion_type: IngestionType,
    ) -> Self {
        Self {
            client,
            provisioner,
            database,
            ingestion_type,
            ingestors: DashMap::new(),
            closed: RwLock::new(false),
        }
    }

    /// Returns the table's ingestor, creating it first if needed.
    ///
    /// Waiting for another caller's creation of the same table is bounded by
    /// this caller's own `deadline`.
    pub async fn get_or_create(
        &self,
        table: &str,
        deadline: Deadline,
    ) -> Result<Arc<Ingestor>, WriteError> {
        match deadline.bound(self.acquire(table, deadline)).await {
            Ok(result) => result,
            Err(error) => Err(provisioning_failed(table, error.into())),
        }
    }

    async fn acquire(&self, table: &str, deadline: Deadline) -> Result<Arc<Ingestor>, WriteError> {
        let closed = self.closed.read().await;
        if *closed {
            return CreateIngestorSnafu { table }.fail();
        }

        let slot = self.slot(table);
        let ingestor = slot
            .get_or_try_init(|| self.create(table, deadline))
            .await?;
        Ok(Arc::clone(ingestor))
    }

    /// Tables that currently have an ingestor, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<_> = self
            .ingestors
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        tables.sort();
        tables
    }

    /// Closes every ingestor, in table order, and keeps going past failures.
    ///
    /// Waits for creations already in flight. Later calls to
    /// [`Self::get_or_create`] fail.
    pub async fn close(&self) -> Result<(), CloseError> {
        let mut closed = self.closed.write().await;
        *closed = true;

        let mut ingestors: Vec<(String, Arc<Ingestor>)> = self
            .ingestors
            .iter()
            .filter_map(|entry| {
                let ingestor = entry.value().get()?;
                Some((entry.key().clone(), Arc::clone(ingestor)))
            })
            .collect();
        self.ingestors.clear();
        ingestors.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut errors: Vec<crate::Error> = Vec::new();
        for (table, ingestor) in ingestors {
            if let Err(error) = ingestor.close().await {
                emit!(AzureDataExplorerCloseError {
                    resource: &table,
                    error: &error,
                });
                errors.push(format!("Closing ingestor for table {table:?} failed: {error}").into());
            }
        }

        CloseError::from_errors(errors)
    }

    fn slot(&self, table: &str) -> Slot {
        if let Some(slot) = self.ingestors.get(table) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.ingestors.entry(table.to_owned()).or_default().value())
    }

    async fn create(&self, table: &str, deadline: Deadline) -> Result<Arc<Ingestor>, WriteError> {
        if let Err(error) = self.provisioner.ensure_table(table, deadline).await {
            return Err(provisioning_failed(table, error));
        }

        let ingestor = Ingestor::new(
            Arc::clone(&self.client),
            IngestionProperties::json(&self.database, table),
            self.ingestion_type,
        );
        emit!(AzureDataExplorerIngestorCreated {
            table,
            ingestion_type: self.ingestion_type,
        });

        Ok(Arc::new(ingestor))
    }
}

fn provisioning_failed(table: &str, error: crate::Error) -> WriteError {
    emit!(AzureDataExplorerProvisioningError {
        table,
        error: &error,
    });
    WriteError::ProvisionTable {
        table: table.to_owned(),
        source: error,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::sinks::{azure_data_explorer::test_util::MockKustoClient, util::DeadlineError};

    fn registry(client: &Arc<MockKustoClient>) -> Arc<IngestorRegistry> {
        let provisioner = TableProvisioner::new(client.clone(), "telemetry".to_owned(), true);
        Arc::new(IngestorRegistry::new(
            client.clone(),
            provisioner,
            "telemetry".to_owned(),
            IngestionType::Queued,
        ))
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn same_table_returns_same_ingestor() {
        let client = Arc::new(MockKustoClient::default());
        let registry = registry(&client);

        let first = registry.get_or_create("cpu", deadline()).await.unwrap();
        let second = registry.get_or_create("cpu", deadline()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.properties(), &IngestionProperties::json("telemetry", "cpu"));
        assert_eq!(first.ingestion_type(), IngestionType::Queued);
        // Provisioned once, no network call on the second lookup.
        assert_eq!(client.mgmt_statements().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_ingestor() {
        let client = Arc::new(MockKustoClient::default());
        client.delay_mgmt(Duration::from_millis(20));
        let registry = registry(&client);

        let handles = (0..8).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("cpu", deadline()).await })
        });
        let ingestors: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|handle| handle.unwrap().unwrap())
            .collect();

        assert!(ingestors.iter().all(|ingestor| Arc::ptr_eq(ingestor, &ingestors[0])));
        assert_eq!(client.mgmt_statements().len(), 2);
        assert_eq!(registry.tables(), vec!["cpu".to_owned()]);
    }

    #[tokio::test]
    async fn tables_do_not_block_each_other() {
        let client = Arc::new(MockKustoClient::default());
        client.stall_table("slow");
        let registry = registry(&client);

        let slow = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.get_or_create("slow", deadline()).await.map(drop) }
        });
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(5), registry.get_or_create("fast", deadline()))
            .await
            .expect("fast table was blocked")
            .unwrap();
        assert!(!slow.is_finished());

        client.resume_stalled();
        slow.await.unwrap().unwrap();
        assert_eq!(registry.tables(), vec!["fast".to_owned(), "slow".to_owned()]);
    }

    #[tokio::test]
    async fn failed_provisioning_is_retried() {
        let client = Arc::new(MockKustoClient::default());
        client.fail_mgmt();
        let registry = registry(&client);

        let error = registry.get_or_create("cpu", deadline()).await.unwrap_err();
        assert!(matches!(error, WriteError::ProvisionTable { ref table, .. } if table == "cpu"));
        assert!(registry.tables().is_empty());

        client.recover_mgmt();
        registry.get_or_create("cpu", deadline()).await.unwrap();
        assert_eq!(registry.tables(), vec!["cpu".to_owned()]);
    }

    #[tokio::test]
    async fn close_releases_every_ingestor() {
        let client = Arc::new(MockKustoClient::default());
        client.fail_release_for("b");
        let registry = registry(&client);
        for table in ["c", "a", "b"] {
            registry.get_or_create(table, deadline()).await.unwrap();
        }

        let error = registry.close().await.unwrap_err();

        assert_eq!(error.errors().len(), 1);
        assert!(error.to_string().contains(r#"table "b""#), "{error}");
        assert_eq!(
            client.released_tables(),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert!(registry.tables().is_empty());
        assert!(matches!(
            registry.get_or_create("a", deadline()).await,
            Err(WriteError::CreateIngestor { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_caller_keeps_its_own_deadline() {
        let client = Arc::new(MockKustoClient::default());
        client.stall_table("cpu");
        let registry = registry(&client);

        let first = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.get_or_create("cpu", deadline()).await.map(drop) }
        });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        let error = registry
            .get_or_create("cpu", Deadline::after(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        match error {
            WriteError::ProvisionTable { table, source } => {
                assert_eq!(table, "cpu");
                assert_eq!(
                    source.downcast_ref::<DeadlineError>(),
                    Some(&DeadlineError::TimedOut)
                );
            }
            error => panic!("unexpected error: {error}"),
        }

        client.resume_stalled();
        first.await.unwrap().unwrap();
        assert_eq!(client.mgmt_statements().len(), 2);
    }

    #[tokio::test]
    async fn close_waits_for_ingestors_being_created() {
        let client = Arc::new(MockKustoClient::default());
        client.stall_table("slow");
        let registry = registry(&client);

        let creating = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.get_or_create("slow", deadline()).await }
        });
        tokio::task::yield_now().await;
        let closing = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.close().await }
        });
        tokio::task::yield_now().await;
        assert!(!closing.is_finished());

        client.resume_stalled();
        let ingestor = creating.await.unwrap().unwrap();
        closing.await.unwrap().unwrap();

        assert_eq!(client.released_tables(), vec!["slow".to_owned()]);
        assert!(ingestor.ingest(&b"{}\n"[..]).await.is_err());
        assert!(registry.tables().is_empty());
        assert!(matches!(
            registry.get_or_create("slow", deadline()).await,
            Err(WriteError::CreateIngestor { .. })
        ));
    }
}
