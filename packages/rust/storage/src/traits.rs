//! Store and queue contracts consumed by the stage processor.
//!
//! `put` followed by `flush` is upsert-by-id: partial entities merge into the
//! stored record without duplicating values, and mentions are insert-once.

#![allow(async_fn_in_trait)]

use sanitize_shared::{Entity, Result, SanitizeError, StoreRecord, Task};
use tracing::debug;

/// Which entities a handle yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFilter {
    /// Every entity in the dataset.
    All,
    /// Only these ids, in this order; unknown ids are skipped.
    Ids(Vec<String>),
}

/// Factory for per-task dataset handles.
pub trait EntityStore {
    type Handle: DatasetHandle;

    /// Open `dataset`, tagging writes with `stage` as their origin.
    async fn open(&self, dataset: &str, stage: &str) -> Result<Self::Handle>;
}

/// An open dataset. Must be closed explicitly; closing twice is a no-op.
pub trait DatasetHandle {
    /// Dataset this handle reads and writes.
    fn dataset(&self) -> &str;

    /// Full entities matching `filter`.
    async fn entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>>;

    /// Durably apply a batch of records in one unit.
    async fn write_batch(&self, records: &[StoreRecord]) -> Result<()>;

    /// Release the handle.
    async fn close(&mut self) -> Result<()>;

    /// Buffered writer scoped to the caller.
    fn writer(&self, batch_size: usize) -> BulkWriter<'_, Self>
    where
        Self: Sized,
    {
        BulkWriter::new(self, batch_size)
    }
}

/// Destination for continuation tasks.
pub trait TaskQueue {
    /// Enqueue `task` for its `operation` stage.
    async fn submit(&self, task: &Task) -> Result<()>;
}

// ---------------------------------------------------------------------------
// BulkWriter
// ---------------------------------------------------------------------------

/// Buffers records and writes them through its handle in batches.
///
/// Any failure to write a batch surfaces as [`SanitizeError::Flush`]; on failure
/// the buffer is kept so nothing is silently discarded.
pub struct BulkWriter<'h, H: DatasetHandle> {
    handle: &'h H,
    buffer: Vec<StoreRecord>,
    batch_size: usize,
    written: usize,
}

impl<'h, H: DatasetHandle> BulkWriter<'h, H> {
    pub fn new(handle: &'h H, batch_size: usize) -> Self {
        Self {
            handle,
            buffer: Vec::new(),
            batch_size: batch_size.max(1),
            written: 0,
        }
    }

    /// Buffer one record, flushing when the batch is full.
    pub async fn put(&mut self, record: impl Into<StoreRecord>) -> Result<()> {
        self.buffer.push(record.into());
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write everything buffered so far.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.handle
            .write_batch(&self.buffer)
            .await
            .map_err(|e| match e {
                SanitizeError::Flush(_) => e,
                other => SanitizeError::Flush(other.to_string()),
            })?;

        debug!(
            dataset = self.handle.dataset(),
            records = self.buffer.len(),
            "flushed write buffer"
        );
        self.written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    /// Records buffered but not yet written.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Records written by successful flushes.
    pub fn written(&self) -> usize {
        self.written
    }
}
