//! Writer lifecycle
//!
//! Each worker routes records into per-table writers. A writer lives for at
//! most one commit round: `complete()` flushes and hands back the staged
//! files, `close()` abandons them. Staged file ownership then travels with
//! the emitted commit response until the coordinator's catalog commit.

pub mod convert;
pub mod iceberg_writer;

pub use convert::RecordConverter;
pub use iceberg_writer::IcebergWriterFactory;

use crate::error::DataResult;
use crate::types::SinkRecord;
use async_trait::async_trait;
use floe_events::{DataFileDescriptor, TableName};
use serde_json::Value as JsonValue;

/// Output of closing one per-table writer
#[derive(Debug, Clone)]
pub struct WriterResult {
    pub table_name: TableName,
    /// Partition tuple of the staged files (empty for unpartitioned tables)
    pub partition: JsonValue,
    pub data_files: Vec<DataFileDescriptor>,
    pub delete_files: Vec<DataFileDescriptor>,
}

impl WriterResult {
    pub fn file_count(&self) -> usize {
        self.data_files.len() + self.delete_files.len()
    }
}

/// Accumulates records for one destination table within one commit round
#[async_trait]
pub trait RecordWriter: Send {
    /// Convert and buffer one record. Conversion and IO failures surface to
    /// the sink framework, which pauses and retries the partition.
    async fn write(&mut self, record: &SinkRecord) -> DataResult<()>;

    /// Flush, close, and return the staged files. Zero files is legal and
    /// yields a no-op commit response.
    async fn complete(self: Box<Self>) -> DataResult<WriterResult>;

    /// Abort, deleting staged files on a best-effort basis.
    async fn close(self: Box<Self>) -> DataResult<()>;
}

/// Creates writers lazily, on the first record routed to a table in a round
#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn create_writer(&self, table_name: &str) -> DataResult<Box<dyn RecordWriter>>;
}
