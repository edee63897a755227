//! Iceberg catalog glue
//!
//! Adapts the Apache Iceberg Rust SDK to [`TableCatalog`]. File descriptors
//! shipped over the control topic are rebuilt into SDK data files at commit
//! time; commits go through a fast-append transaction with the round's
//! summary properties attached.

use super::{TableCatalog, SUMMARY_COMMIT_ID};
use crate::error::{ConnectError, Result};
use async_trait::async_trait;
use floe_events::{DataFileDescriptor, FileContent, TableName};
use iceberg::spec::{DataContentType, DataFile, DataFileBuilder, DataFileFormat, Struct};
use iceberg::transaction::{ApplyTransactionAction, Transaction};
use iceberg::{Catalog, CatalogBuilder, TableIdent};
use iceberg_catalog_rest::RestCatalogBuilder;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// [`TableCatalog`] over any SDK catalog implementation
pub struct IcebergCatalog {
    inner: Arc<dyn Catalog>,
}

impl IcebergCatalog {
    pub fn new(inner: Arc<dyn Catalog>) -> Self {
        Self { inner }
    }

    /// Connect a REST catalog from the connector's `iceberg.catalog.*`
    /// properties (`uri`, `warehouse`, credentials, storage wiring).
    pub async fn connect_rest(name: &str, props: HashMap<String, String>) -> Result<Self> {
        let catalog = RestCatalogBuilder::default()
            .load(name, props)
            .await
            .map_err(|e| ConnectError::catalog(format!("REST catalog connect: {e}")))?;
        info!(catalog = %name, "Connected REST catalog");
        Ok(Self::new(Arc::new(catalog)))
    }

    /// SDK handle, for writer factories that need to load tables.
    pub fn inner(&self) -> Arc<dyn Catalog> {
        self.inner.clone()
    }

    fn table_ident(table: &TableName) -> Result<TableIdent> {
        TableIdent::from_strs(table.namespace.iter().chain(std::iter::once(&table.name)))
            .map_err(|e| ConnectError::catalog(format!("invalid table {table}: {e}")))
    }
}

#[async_trait]
impl TableCatalog for IcebergCatalog {
    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let ident = Self::table_ident(table)?;
        self.inner
            .table_exists(&ident)
            .await
            .map_err(|e| ConnectError::catalog(format!("table_exists {table}: {e}")))
    }

    async fn snapshot_for_commit(
        &self,
        table: &TableName,
        commit_id: &str,
    ) -> Result<Option<i64>> {
        let ident = Self::table_ident(table)?;
        let loaded = self
            .inner
            .load_table(&ident)
            .await
            .map_err(|e| ConnectError::catalog(format!("load_table {table}: {e}")))?;

        for snapshot in loaded.metadata().snapshots() {
            let summary = snapshot.summary();
            if summary.additional_properties.get(SUMMARY_COMMIT_ID).map(String::as_str)
                == Some(commit_id)
            {
                return Ok(Some(snapshot.snapshot_id()));
            }
        }
        Ok(None)
    }

    async fn append_files(
        &self,
        table: &TableName,
        data_files: Vec<DataFileDescriptor>,
        delete_files: Vec<DataFileDescriptor>,
        summary: HashMap<String, String>,
    ) -> Result<i64> {
        let ident = Self::table_ident(table)?;
        let loaded = self
            .inner
            .load_table(&ident)
            .await
            .map_err(|e| ConnectError::catalog(format!("load_table {table}: {e}")))?;

        let spec_id = loaded.metadata().default_partition_spec_id();
        let files: Vec<DataFile> = data_files
            .iter()
            .chain(delete_files.iter())
            .map(|descriptor| rebuild_data_file(descriptor, spec_id))
            .collect::<Result<_>>()?;

        let tx = Transaction::new(&loaded);
        let action = tx
            .fast_append()
            .set_snapshot_properties(summary)
            .add_data_files(files);
        let tx = action
            .apply(tx)
            .map_err(|e| ConnectError::catalog(format!("apply append {table}: {e}")))?;
        let committed = tx
            .commit(self.inner.as_ref())
            .await
            .map_err(|e| ConnectError::catalog(format!("commit {table}: {e}")))?;

        committed
            .metadata()
            .current_snapshot_id()
            .ok_or_else(|| ConnectError::catalog(format!("{table} has no snapshot after commit")))
    }
}

/// Rebuild an SDK data file from a wire descriptor. Staged files are always
/// unpartitioned; the partition tuple is empty.
fn rebuild_data_file(descriptor: &DataFileDescriptor, spec_id: i32) -> Result<DataFile> {
    let content = match descriptor.content {
        FileContent::Data => DataContentType::Data,
        FileContent::PositionDeletes => DataContentType::PositionDeletes,
        FileContent::EqualityDeletes => DataContentType::EqualityDeletes,
    };
    let format = match descriptor.file_format.to_ascii_lowercase().as_str() {
        "parquet" => DataFileFormat::Parquet,
        "avro" => DataFileFormat::Avro,
        "orc" => DataFileFormat::Orc,
        other => {
            return Err(ConnectError::catalog(format!(
                "unsupported file format {other} for {}",
                descriptor.file_path
            )))
        }
    };

    DataFileBuilder::default()
        .content(content)
        .file_path(descriptor.file_path.clone())
        .file_format(format)
        .partition(Struct::empty())
        .partition_spec_id(spec_id)
        .record_count(descriptor.record_count)
        .file_size_in_bytes(descriptor.file_size_bytes)
        .equality_ids(Some(descriptor.equality_ids.clone()))
        .build()
        .map_err(|e| {
            ConnectError::catalog(format!("rebuild data file {}: {e}", descriptor.file_path))
        })
}
