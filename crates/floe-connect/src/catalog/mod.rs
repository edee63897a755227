//! Table-service abstraction
//!
//! The coordination core needs exactly three things from the catalog: an
//! existence check for dynamic routing, an idempotence probe over recent
//! snapshot summaries, and an atomic multi-file append that attaches
//! user-set summary keys. Everything else about the table format stays
//! behind this trait.

mod memory;

pub mod iceberg;

pub use self::iceberg::IcebergCatalog;
pub use memory::{MemoryCatalog, SnapshotEntry};

use crate::error::Result;
use async_trait::async_trait;
use floe_events::{DataFileDescriptor, TableName};
use std::collections::HashMap;

/// Snapshot summary key carrying the commit round id
pub const SUMMARY_COMMIT_ID: &str = "floe.commit-id";
/// Snapshot summary key carrying the round's valid-through timestamp
pub const SUMMARY_VTTS: &str = "floe.vtts-ms";

/// Catalog capabilities consumed by the worker and coordinator
#[async_trait]
pub trait TableCatalog: Send + Sync {
    /// Whether the table exists. Used by dynamic routing.
    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    /// Snapshot id of a recent snapshot whose summary carries `commit_id`,
    /// if any. This is the idempotence probe: a hit means the round was
    /// already applied to this table.
    async fn snapshot_for_commit(&self, table: &TableName, commit_id: &str)
        -> Result<Option<i64>>;

    /// Atomically append staged files to the table with the given snapshot
    /// summary properties. Returns the new snapshot id.
    async fn append_files(
        &self,
        table: &TableName,
        data_files: Vec<DataFileDescriptor>,
        delete_files: Vec<DataFileDescriptor>,
        summary: HashMap<String, String>,
    ) -> Result<i64>;
}
