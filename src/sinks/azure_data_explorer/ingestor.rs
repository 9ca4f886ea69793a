//! Per-table ingestion handles.
//!
//! Queued ingestion reads the payload in fixed size blocks, uploads them as
//! the blocks of one blob and asks the cluster to load the blob. At most
//! [`MAX_BUFFERS`] blocks of [`BUFFER_SIZE`] bytes are held at once per
//! ingestor, across all concurrent submissions.
//!
//! Managed ingestion streams payloads straight into the table and falls back
//! to the queued path when a payload is too large to be streamed.

use std::{fmt, io::Cursor, sync::Arc};

use base64::{Engine as _, prelude::BASE64_STANDARD};
use bytes::BytesMut;
use futures::{StreamExt, stream::FuturesUnordered};
use snafu::Snafu;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
};
use uuid::Uuid;

use super::{
    IngestionType,
    client::{BlobLocation, IngestionProperties, KustoClient},
};

pub const BUFFER_SIZE: usize = 1 << 20;
pub const MAX_BUFFERS: usize = 5;
/// Largest payload sent through streaming ingestion.
pub const STREAMING_MAX_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Snafu)]
pub enum IngestorError {
    #[snafu(display("Ingestor for table {:?} is closed", table))]
    Closed { table: String },
}

/// How a submitted payload reached the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestionStatus {
    /// Staged as a blob and handed to the ingestion queue.
    Queued,
    /// Streamed directly into the table.
    Streamed,
    /// The payload was empty; nothing was sent.
    Empty,
}

#[derive(Debug)]
pub enum Ingestor {
    Queued(QueuedIngestor),
    Managed(ManagedIngestor),
}

impl Ingestor {
    pub fn new(
        client: Arc<dyn KustoClient>,
        properties: IngestionProperties,
        ingestion_type: IngestionType,
    ) -> Self {
        let queued = QueuedIngestor::new(client, properties);
        match ingestion_type {
            IngestionType::Queued => Self::Queued(queued),
            IngestionType::Managed => Self::Managed(ManagedIngestor { queued }),
        }
    }

    pub fn properties(&self) -> &IngestionProperties {
        &self.queued().properties
    }

    pub const fn ingestion_type(&self) -> IngestionType {
        match self {
            Self::Queued(_) => IngestionType::Queued,
            Self::Managed(_) => IngestionType::Managed,
        }
    }

    /// Submits everything `reader` yields as one ingestion job.
    pub async fn ingest<R>(&self, reader: R) -> crate::Result<IngestionStatus>
    where
        R: AsyncRead + Unpin + Send,
    {
        let queued = self.queued();
        if queued.buffers.is_closed() {
            return Err(queued.closed_error());
        }

        match self {
            Self::Queued(ingestor) => ingestor.ingest(reader).await,
            Self::Managed(ingestor) => ingestor.ingest(reader).await,
        }
    }

    /// Rejects later submissions and releases the handle's client resources.
    pub async fn close(&self) -> crate::Result<()> {
        let queued = self.queued();
        queued.buffers.close();
        queued.client.release(&queued.properties).await
    }

    const fn queued(&self) -> &QueuedIngestor {
        match self {
            Self::Queued(ingestor) => ingestor,
            Self::Managed(ingestor) => &ingestor.queued,
        }
    }
}

pub struct QueuedIngestor {
    client: Arc<dyn KustoClient>,
    properties: IngestionProperties,
    buffers: Arc<Semaphore>,
}

impl fmt::Debug for QueuedIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedIngestor")
            .field("properties", &self.properties)
            .field("available_buffers", &self.buffers.available_permits())
            .finish_non_exhaustive()
    }
}

impl QueuedIngestor {
    fn new(client: Arc<dyn KustoClient>, properties: IngestionProperties) -> Self {
        Self {
            client,
            properties,
            buffers: Arc::new(Semaphore::new(MAX_BUFFERS)),
        }
    }

    async fn ingest<R>(&self, mut reader: R) -> crate::Result<IngestionStatus>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut permit = self.acquire_buffer().await?;
        let mut block = read_block(&mut reader, BUFFER_SIZE).await?;
        if block.is_empty() {
            return Ok(IngestionStatus::Empty);
        }

        let blob = self.client.create_blob(&self.blob_name()).await?;
        let mut uploads = FuturesUnordered::new();
        let mut block_ids = Vec::new();
        let mut raw_data_size = 0;

        loop {
            raw_data_size += block.len();
            let block_id = block_id(block_ids.len());
            block_ids.push(block_id.clone());
            uploads.push(self.stage(&blob, block_id, block, permit));

            // Wait for an upload to finish whenever every buffer is in use.
            permit = loop {
                match Arc::clone(&self.buffers).try_acquire_owned() {
                    Ok(permit) => break permit,
                    Err(TryAcquireError::Closed) => return Err(self.closed_error()),
                    Err(TryAcquireError::NoPermits) => match uploads.next().await {
                        Some(result) => result?,
                        None => break self.acquire_buffer().await?,
                    },
                }
            };

            block = read_block(&mut reader, BUFFER_SIZE).await?;
            if block.is_empty() {
                break;
            }
        }
        drop(permit);

        while let Some(result) = uploads.next().await {
            result?;
        }
        self.client.commit_blob(&blob, &block_ids).await?;
        self.client
            .enqueue_ingestion(&blob, raw_data_size, &self.properties)
            .await?;

        Ok(IngestionStatus::Queued)
    }

    async fn stage(
        &self,
        blob: &BlobLocation,
        block_id: String,
        block: BytesMut,
        _buffer: OwnedSemaphorePermit,
    ) -> crate::Result<()> {
        self.client
            .stage_block(blob, &block_id, block.freeze())
            .await
    }

    async fn acquire_buffer(&self) -> crate::Result<OwnedSemaphorePermit> {
        Arc::clone(&self.buffers)
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())
    }

    fn blob_name(&self) -> String {
        format!(
            "{}__{}__{}.{}",
            self.properties.database,
            self.properties.table,
            Uuid::new_v4(),
            self.properties.format
        )
    }

    fn closed_error(&self) -> crate::Error {
        ClosedSnafu {
            table: self.properties.table.clone(),
        }
        .build()
        .into()
    }
}

#[derive(Debug)]
pub struct ManagedIngestor {
    queued: QueuedIngestor,
}

impl ManagedIngestor {
    async fn ingest<R>(&self, mut reader: R) -> crate::Result<IngestionStatus>
    where
        R: AsyncRead + Unpin + Send,
    {
        let head = read_block(&mut reader, STREAMING_MAX_SIZE + 1).await?;
        if head.is_empty() {
            return Ok(IngestionStatus::Empty);
        }

        if head.len() <= STREAMING_MAX_SIZE {
            self.queued
                .client
                .stream_ingest(&self.queued.properties, head.freeze())
                .await?;
            return Ok(IngestionStatus::Streamed);
        }

        debug!(
            message = "Payload exceeds the streaming limit, using queued ingestion.",
            table = %self.queued.properties.table,
            limit = STREAMING_MAX_SIZE,
        );
        self.queued
            .ingest(Cursor::new(head.freeze()).chain(reader))
            .await
    }
}

/// Reads until `limit` bytes are buffered or the reader is exhausted.
async fn read_block<R>(reader: &mut R, limit: usize) -> std::io::Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut block = BytesMut::with_capacity(limit.min(BUFFER_SIZE));
    let mut reader = reader.take(limit as u64);
    while reader.read_buf(&mut block).await? != 0 {}
    Ok(block)
}

/// Block ids of one blob must all have the same length.
fn block_id(index: usize) -> String {
    BASE64_STANDARD.encode(format!("{index:016}"))
}
