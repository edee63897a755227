//! Testing utilities
//!
//! In-memory stand-ins used by the crate's own tests and by embedders
//! writing harnesses: a recording writer factory that mints file
//! descriptors instead of touching storage, and a catalog wrapper with an
//! injectable commit failure.

use crate::catalog::{MemoryCatalog, TableCatalog};
use crate::data::{RecordWriter, WriterFactory, WriterResult};
use crate::error::{ConnectError, DataResult, Result};
use crate::types::SinkRecord;
use async_trait::async_trait;
use floe_events::{DataFileDescriptor, TableName};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters shared by every writer a [`RecordingWriterFactory`] creates
#[derive(Debug, Default)]
pub struct WriterStats {
    pub writers_created: AtomicU64,
    pub writers_completed: AtomicU64,
    pub writers_closed: AtomicU64,
    pub records_written: AtomicU64,
}

impl WriterStats {
    pub fn created(&self) -> u64 {
        self.writers_created.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.writers_completed.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.writers_closed.load(Ordering::Relaxed)
    }

    /// Writers that were neither completed nor closed.
    pub fn open(&self) -> u64 {
        self.created() - self.completed() - self.closed()
    }
}

/// Writer factory that stages nothing: each completed writer reports one
/// fabricated data file carrying its record count
#[derive(Debug, Clone, Default)]
pub struct RecordingWriterFactory {
    stats: Arc<WriterStats>,
}

impl RecordingWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl WriterFactory for RecordingWriterFactory {
    async fn create_writer(&self, table_name: &str) -> DataResult<Box<dyn RecordWriter>> {
        self.stats.writers_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(RecordingWriter {
            table_name: TableName::parse(table_name),
            records: 0,
            stats: self.stats.clone(),
        }))
    }
}

struct RecordingWriter {
    table_name: TableName,
    records: u64,
    stats: Arc<WriterStats>,
}

#[async_trait]
impl RecordWriter for RecordingWriter {
    async fn write(&mut self, _record: &SinkRecord) -> DataResult<()> {
        self.records += 1;
        self.stats.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn complete(self: Box<Self>) -> DataResult<WriterResult> {
        self.stats.writers_completed.fetch_add(1, Ordering::Relaxed);
        let data_files = if self.records > 0 {
            vec![DataFileDescriptor::data(
                format!(
                    "mem://{}/{}.parquet",
                    self.table_name.identifier(),
                    Uuid::new_v4()
                ),
                self.records,
                self.records * 1024,
            )]
        } else {
            Vec::new()
        };
        Ok(WriterResult {
            table_name: self.table_name,
            partition: JsonValue::Null,
            data_files,
            delete_files: Vec::new(),
        })
    }

    async fn close(self: Box<Self>) -> DataResult<()> {
        self.stats.writers_closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// [`MemoryCatalog`] wrapper whose appends can be made to fail on demand
#[derive(Debug, Clone)]
pub struct FlakyCatalog {
    inner: MemoryCatalog,
    fail_appends: Arc<AtomicBool>,
}

impl FlakyCatalog {
    pub fn new(inner: MemoryCatalog) -> Self {
        Self {
            inner,
            fail_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl TableCatalog for FlakyCatalog {
    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        self.inner.table_exists(table).await
    }

    async fn snapshot_for_commit(
        &self,
        table: &TableName,
        commit_id: &str,
    ) -> Result<Option<i64>> {
        self.inner.snapshot_for_commit(table, commit_id).await
    }

    async fn append_files(
        &self,
        table: &TableName,
        data_files: Vec<DataFileDescriptor>,
        delete_files: Vec<DataFileDescriptor>,
        summary: HashMap<String, String>,
    ) -> Result<i64> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(ConnectError::catalog("injected append failure"));
        }
        self.inner
            .append_files(table, data_files, delete_files, summary)
            .await
    }
}

/// Shorthand for a JSON-valued sink record.
pub fn json_record(
    topic: &str,
    partition: i32,
    offset: i64,
    timestamp_ms: i64,
    value: JsonValue,
) -> SinkRecord {
    SinkRecord {
        topic: topic.to_string(),
        partition,
        offset,
        timestamp_ms: Some(timestamp_ms),
        value: Some(value),
    }
}
