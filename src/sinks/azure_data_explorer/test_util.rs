use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use super::{
    client::{BlobLocation, IngestionProperties, KustoClient},
    ingestor::IngestionStatus,
};

/// A payload that reached the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub table: String,
    pub payload: Bytes,
    pub status: IngestionStatus,
}

#[derive(Clone, Debug)]
pub struct CommittedBlob {
    pub name: String,
    pub block_sizes: Vec<usize>,
    payload: Bytes,
}

#[derive(Default)]
struct State {
    mgmt: Vec<(String, String)>,
    staged: HashMap<(String, String), Bytes>,
    committed: Vec<CommittedBlob>,
    submissions: Vec<Submission>,
    released: Vec<String>,
    closes: usize,

    fail_mgmt: bool,
    mgmt_delay: Option<Duration>,
    stalled_table: Option<String>,
    fail_staging: bool,
    fail_ingestion: HashSet<String>,
    fail_release: HashSet<String>,
    fail_close: bool,
}

/// Records every call and fails on demand.
#[derive(Default)]
pub struct MockKustoClient {
    state: Mutex<State>,
    resume: Notify,
}

impl MockKustoClient {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail_mgmt(&self) {
        self.state().fail_mgmt = true;
    }

    pub fn recover_mgmt(&self) {
        self.state().fail_mgmt = false;
    }

    pub fn delay_mgmt(&self, delay: Duration) {
        self.state().mgmt_delay = Some(delay);
    }

    /// The next management statement for `table` waits for
    /// [`Self::resume_stalled`].
    pub fn stall_table(&self, table: &str) {
        self.state().stalled_table = Some(table.to_owned());
    }

    /// Releases the stalled statement; later statements run straight through.
    pub fn resume_stalled(&self) {
        self.state().stalled_table = None;
        self.resume.notify_one();
    }

    pub fn fail_staging(&self) {
        self.state().fail_staging = true;
    }

    pub fn fail_ingestion_for(&self, table: &str) {
        self.state().fail_ingestion.insert(table.to_owned());
    }

    pub fn fail_release_for(&self, table: &str) {
        self.state().fail_release.insert(table.to_owned());
    }

    pub fn fail_close(&self) {
        self.state().fail_close = true;
    }

    pub fn mgmt_statements(&self) -> Vec<(String, String)> {
        self.state().mgmt.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn committed_blobs(&self) -> Vec<CommittedBlob> {
        self.state().committed.clone()
    }

    /// Tables whose ingestor was released, including failed releases.
    pub fn released_tables(&self) -> Vec<String> {
        self.state().released.clone()
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    fn check_ingestion(&self, properties: &IngestionProperties) -> crate::Result<()> {
        if self.state().fail_ingestion.contains(&properties.table) {
            Err(format!("ingestion into {:?} rejected", properties.table).into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KustoClient for MockKustoClient {
    async fn execute_mgmt(&self, database: &str, statement: &str) -> crate::Result<()> {
        let (delay, stalled) = {
            let state = self.state();
            let stalled = state
                .stalled_table
                .as_ref()
                .is_some_and(|table| statement.contains(&format!("['{table}']")));
            (state.mgmt_delay, stalled)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if stalled {
            self.resume.notified().await;
        }

        let mut state = self.state();
        state.mgmt.push((database.to_owned(), statement.to_owned()));
        if state.fail_mgmt {
            Err("management statement rejected".into())
        } else {
            Ok(())
        }
    }

    async fn stream_ingest(
        &self,
        properties: &IngestionProperties,
        payload: Bytes,
    ) -> crate::Result<()> {
        self.check_ingestion(properties)?;
        self.state().submissions.push(Submission {
            table: properties.table.clone(),
            payload,
            status: IngestionStatus::Streamed,
        });
        Ok(())
    }

    async fn create_blob(&self, name: &str) -> crate::Result<BlobLocation> {
        Ok(BlobLocation {
            base_url: "https://mock.blob.core.windows.net/container".to_owned(),
            name: name.to_owned(),
            sas_token: "sig=mock".to_owned(),
        })
    }

    async fn stage_block(
        &self,
        blob: &BlobLocation,
        block_id: &str,
        block: Bytes,
    ) -> crate::Result<()> {
        // Give other uploads a chance to interleave.
        tokio::task::yield_now().await;
        let mut state = self.state();
        if state.fail_staging {
            return Err(format!("staging block {block_id} of {} failed", blob.name).into());
        }
        state
            .staged
            .insert((blob.name.clone(), block_id.to_owned()), block);
        Ok(())
    }

    async fn commit_blob(&self, blob: &BlobLocation, block_ids: &[String]) -> crate::Result<()> {
        let mut state = self.state();
        let mut payload = BytesMut::new();
        let mut block_sizes = Vec::new();
        for id in block_ids {
            let block = state
                .staged
                .remove(&(blob.name.clone(), id.clone()))
                .ok_or_else(|| format!("block {id} of {} was never staged", blob.name))?;
            block_sizes.push(block.len());
            payload.extend_from_slice(&block);
        }
        state.committed.push(CommittedBlob {
            name: blob.name.clone(),
            block_sizes,
            payload: payload.freeze(),
        });
        Ok(())
    }

    async fn enqueue_ingestion(
        &self,
        blob: &BlobLocation,
        raw_data_size: usize,
        properties: &IngestionProperties,
    ) -> crate::Result<()> {
        self.check_ingestion(properties)?;
        let mut state = self.state();
        let payload = state
            .committed
            .iter()
            .find(|committed| committed.name == blob.name)
            .map(|committed| committed.payload.clone())
            .ok_or("blob was never committed")?;
        if payload.len() != raw_data_size {
            return Err(format!("raw size {raw_data_size} != blob size {}", payload.len()).into());
        }
        state.submissions.push(Submission {
            table: properties.table.clone(),
            payload,
            status: IngestionStatus::Queued,
        });
        Ok(())
    }

    async fn release(&self, properties: &IngestionProperties) -> crate::Result<()> {
        let mut state = self.state();
        state.released.push(properties.table.clone());
        if state.fail_release.contains(&properties.table) {
            Err(format!("release of {:?} failed", properties.table).into())
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> crate::Result<()> {
        let mut state = self.state();
        state.closes += 1;
        if state.fail_close {
            Err("client close failed".into())
        } else {
            Ok(())
        }
    }
}
