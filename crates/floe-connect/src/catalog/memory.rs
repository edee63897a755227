//! In-memory catalog
//!
//! Tables are snapshot lists with summary maps. Backs the integration tests
//! and mirrors what the coordinator actually consumes from a real catalog.

use super::{TableCatalog, SUMMARY_COMMIT_ID};
use crate::error::{ConnectError, Result};
use async_trait::async_trait;
use floe_events::{DataFileDescriptor, TableName};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One committed snapshot
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub snapshot_id: i64,
    pub summary: HashMap<String, String>,
    pub data_files: Vec<DataFileDescriptor>,
    pub delete_files: Vec<DataFileDescriptor>,
}

#[derive(Debug, Default)]
struct TableState {
    snapshots: Vec<SnapshotEntry>,
    next_snapshot_id: i64,
}

/// Shared in-memory catalog; clone handles freely
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: Arc<Mutex<HashMap<String, TableState>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table (idempotent).
    pub async fn create_table(&self, identifier: &str) {
        let mut tables = self.tables.lock().await;
        tables.entry(identifier.to_string()).or_default();
    }

    /// Snapshots committed to a table, oldest first. Test inspection seam.
    pub async fn snapshots(&self, identifier: &str) -> Vec<SnapshotEntry> {
        let tables = self.tables.lock().await;
        tables
            .get(identifier)
            .map(|t| t.snapshots.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TableCatalog for MemoryCatalog {
    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.contains_key(&table.identifier()))
    }

    async fn snapshot_for_commit(
        &self,
        table: &TableName,
        commit_id: &str,
    ) -> Result<Option<i64>> {
        let tables = self.tables.lock().await;
        let Some(state) = tables.get(&table.identifier()) else {
            return Ok(None);
        };
        Ok(state
            .snapshots
            .iter()
            .rev()
            .find(|s| s.summary.get(SUMMARY_COMMIT_ID).map(String::as_str) == Some(commit_id))
            .map(|s| s.snapshot_id))
    }

    async fn append_files(
        &self,
        table: &TableName,
        data_files: Vec<DataFileDescriptor>,
        delete_files: Vec<DataFileDescriptor>,
        summary: HashMap<String, String>,
    ) -> Result<i64> {
        let mut tables = self.tables.lock().await;
        let state = tables.get_mut(&table.identifier()).ok_or_else(|| {
            ConnectError::catalog(format!("table {} does not exist", table.identifier()))
        })?;

        state.next_snapshot_id += 1;
        let snapshot_id = state.next_snapshot_id;
        state.snapshots.push(SnapshotEntry {
            snapshot_id,
            summary,
            data_files,
            delete_files,
        });
        Ok(snapshot_id)
    }
}
