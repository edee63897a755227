//! Iceberg table writer
//!
//! Buffers converted rows for one table and, on `complete()`, runs them
//! through the SDK writer stack: Parquet file writer, rolling by target
//! size, wrapped as an Iceberg data-file writer. Files land unpartitioned;
//! a unique file-name suffix keeps every round's files distinct.

use super::convert::RecordConverter;
use super::{RecordWriter, WriterFactory, WriterResult};
use crate::error::{DataError, DataResult};
use crate::types::SinkRecord;
use async_trait::async_trait;
use floe_events::{DataFileDescriptor, FileContent, TableName};
use iceberg::spec::{DataContentType, DataFileFormat};
use iceberg::writer::base_writer::data_file_writer::DataFileWriterBuilder;
use iceberg::writer::file_writer::location_generator::{
    DefaultFileNameGenerator, DefaultLocationGenerator,
};
use iceberg::writer::file_writer::rolling_writer::RollingFileWriterBuilder;
use iceberg::writer::file_writer::ParquetWriterBuilder;
use iceberg::writer::{IcebergWriter, IcebergWriterBuilder};
use iceberg::{Catalog, TableIdent};
use parquet::file::properties::WriterProperties;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const TARGET_FILE_SIZE: usize = 128 * 1024 * 1024;

/// Creates one [`IcebergTableWriter`] per destination table per round
pub struct IcebergWriterFactory {
    catalog: Arc<dyn Catalog>,
}

impl IcebergWriterFactory {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl WriterFactory for IcebergWriterFactory {
    async fn create_writer(&self, table_name: &str) -> DataResult<Box<dyn RecordWriter>> {
        let ident = TableIdent::from_strs(table_name.split('.'))
            .map_err(|e| DataError::writer(format!("invalid table {table_name}: {e}")))?;
        let table = self
            .catalog
            .load_table(&ident)
            .await
            .map_err(|e| DataError::writer(format!("load table {table_name}: {e}")))?;
        let converter = RecordConverter::new(table.metadata().current_schema().clone())?;

        debug!(table = %table_name, "Created table writer");
        Ok(Box::new(IcebergTableWriter {
            table_name: TableName::parse(table_name),
            table,
            converter,
            rows: Vec::new(),
        }))
    }
}

struct IcebergTableWriter {
    table_name: TableName,
    table: iceberg::table::Table,
    converter: RecordConverter,
    rows: Vec<JsonValue>,
}

#[async_trait]
impl RecordWriter for IcebergTableWriter {
    async fn write(&mut self, record: &SinkRecord) -> DataResult<()> {
        let value = record
            .value
            .clone()
            .ok_or_else(|| DataError::conversion("cannot write a null record value"))?;
        // Validate eagerly so the failure points at the offending record,
        // not at the end-of-round flush.
        self.converter.validate_row(&value)?;
        self.rows.push(value);
        Ok(())
    }

    async fn complete(self: Box<Self>) -> DataResult<WriterResult> {
        if self.rows.is_empty() {
            return Ok(WriterResult {
                table_name: self.table_name,
                partition: JsonValue::Null,
                data_files: Vec::new(),
                delete_files: Vec::new(),
            });
        }

        let batch = self.converter.convert_batch(&self.rows)?;
        let metadata = self.table.metadata();

        let location_generator = DefaultLocationGenerator::new(metadata.clone())
            .map_err(|e| DataError::writer(format!("location generator: {e}")))?;
        // Unique suffix so two rounds can never stage the same path.
        let unique_suffix = Uuid::new_v4().to_string()[..8].to_string();
        let file_name_generator = DefaultFileNameGenerator::new(
            "floe".to_string(),
            Some(unique_suffix),
            DataFileFormat::Parquet,
        );

        let parquet_builder = ParquetWriterBuilder::new(
            WriterProperties::builder().build(),
            metadata.current_schema().clone(),
            None,
            self.table.file_io().clone(),
            location_generator,
            file_name_generator,
        );
        let rolling_builder = RollingFileWriterBuilder::new(parquet_builder, TARGET_FILE_SIZE);
        let mut writer = DataFileWriterBuilder::new(
            rolling_builder,
            None,
            metadata.default_partition_spec_id(),
        )
        .build()
        .await
        .map_err(|e| DataError::writer(format!("data file writer: {e}")))?;

        writer
            .write(batch)
            .await
            .map_err(|e| DataError::writer(format!("write batch: {e}")))?;
        let data_files = writer
            .close()
            .await
            .map_err(|e| DataError::writer(format!("close writer: {e}")))?;

        let mut result = WriterResult {
            table_name: self.table_name,
            partition: JsonValue::Null,
            data_files: Vec::with_capacity(data_files.len()),
            delete_files: Vec::new(),
        };
        for file in data_files {
            let descriptor = DataFileDescriptor {
                content: match file.content_type() {
                    DataContentType::Data => FileContent::Data,
                    DataContentType::PositionDeletes => FileContent::PositionDeletes,
                    DataContentType::EqualityDeletes => FileContent::EqualityDeletes,
                },
                file_path: file.file_path().to_string(),
                file_format: file.file_format().to_string(),
                partition: JsonValue::Null,
                record_count: file.record_count(),
                file_size_bytes: file.file_size_in_bytes(),
                equality_ids: Vec::new(),
                sort_order_id: None,
            };
            match descriptor.content {
                FileContent::Data => result.data_files.push(descriptor),
                _ => result.delete_files.push(descriptor),
            }
        }
        Ok(result)
    }

    async fn close(self: Box<Self>) -> DataResult<()> {
        // Rows are only buffered in memory until complete(); nothing is
        // staged on storage yet, so dropping them is the whole abort.
        Ok(())
    }
}
