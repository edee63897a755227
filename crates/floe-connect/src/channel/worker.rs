//! Worker state machine
//!
//! Runs inside every sink task. Routes incoming records to per-table
//! writers, tracks per-partition source positions, and answers the
//! coordinator's commit requests by closing its writers and publishing the
//! staged files plus its full partition assignment.

use crate::catalog::TableCatalog;
use crate::channel::{ControlChannel, Envelope};
use crate::config::ConnectorConfig;
use crate::data::{RecordWriter, WriterFactory};
use crate::error::Result;
use crate::extract::extract_route_value;
use crate::metrics::{ConnectorMetrics, SharedMetrics};
use crate::task::SinkTaskContext;
use crate::transport::TransportFactory;
use crate::types::{Offset, SinkRecord, TopicPartition};
use floe_events::{
    CommitReadyPayload, CommitResponsePayload, Event, EventPayload, TableName,
    TopicPartitionOffset,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Worker {
    config: Arc<ConnectorConfig>,
    channel: ControlChannel,
    catalog: Arc<dyn TableCatalog>,
    writer_factory: Arc<dyn WriterFactory>,
    context: Arc<dyn SinkTaskContext>,
    metrics: SharedMetrics,
    /// Open writers for this round, by table name
    writers: HashMap<String, Box<dyn RecordWriter>>,
    /// Memoized existence checks for dynamic routing, reset each round
    table_exists: HashMap<String, bool>,
    /// Next position to consume per source partition, reset each round
    source_offsets: HashMap<TopicPartition, Offset>,
}

impl Worker {
    pub async fn new(
        config: Arc<ConnectorConfig>,
        factory: &dyn TransportFactory,
        catalog: Arc<dyn TableCatalog>,
        writer_factory: Arc<dyn WriterFactory>,
        context: Arc<dyn SinkTaskContext>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let channel = ControlChannel::for_worker(factory, &config).await?;
        Ok(Self {
            config,
            channel,
            catalog,
            writer_factory,
            context,
            metrics,
            writers: HashMap::new(),
            table_exists: HashMap::new(),
            source_offsets: HashMap::new(),
        })
    }

    /// Accept a batch of records from the sink framework.
    pub async fn save(&mut self, records: &[SinkRecord]) -> Result<()> {
        for record in records {
            self.save_one(record).await?;
        }
        Ok(())
    }

    async fn save_one(&mut self, record: &SinkRecord) -> Result<()> {
        // Sink offsets name the NEXT record to consume, hence the +1.
        self.source_offsets.insert(
            record.topic_partition(),
            Offset::new(record.offset + 1, record.timestamp_ms),
        );
        ConnectorMetrics::incr(&self.metrics.records_saved);

        if self.config.dynamic_tables_enabled {
            self.route_dynamically(record).await
        } else {
            self.route_statically(record).await
        }
    }

    async fn route_statically(&mut self, record: &SinkRecord) -> Result<()> {
        match self.config.route_field.clone() {
            None => {
                // No route field: every configured table gets the record.
                for table in self.config.tables.clone() {
                    self.write_to_table(&table, record).await?;
                }
            }
            Some(route_field) => {
                let Some(route_value) = extract_route_value(record.value.as_ref(), &route_field)
                else {
                    return Ok(());
                };
                for table in self.config.tables.clone() {
                    let matches = self
                        .config
                        .table_route_regex(&table)
                        .is_some_and(|regex| regex.is_match(&route_value));
                    if matches {
                        self.write_to_table(&table, record).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn route_dynamically(&mut self, record: &SinkRecord) -> Result<()> {
        let route_field = self
            .config
            .route_field
            .clone()
            .unwrap_or_default(); // enforced non-empty by config validation

        let Some(route_value) = extract_route_value(record.value.as_ref(), &route_field) else {
            return Ok(());
        };
        let table = route_value.to_lowercase();
        if self.table_exists(&table).await? {
            self.write_to_table(&table, record).await?;
        } else {
            // Skip-on-miss: the offset has already advanced, so the record
            // is dropped for good. Counted so operators can see it happen.
            ConnectorMetrics::incr(&self.metrics.records_skipped);
            debug!(table = %table, "Dropping record routed to nonexistent table");
        }
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        if let Some(&exists) = self.table_exists.get(table) {
            return Ok(exists);
        }
        let exists = self.catalog.table_exists(&TableName::parse(table)).await?;
        self.table_exists.insert(table.to_string(), exists);
        Ok(exists)
    }

    async fn write_to_table(&mut self, table: &str, record: &SinkRecord) -> Result<()> {
        let writer = match self.writers.entry(table.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let writer = self.writer_factory.create_writer(table).await?;
                entry.insert(writer)
            }
        };
        writer.write(record).await?;
        Ok(())
    }

    /// Drain the control topic and handle any commit request.
    pub async fn process(&mut self) -> Result<()> {
        let envelopes = self.channel.poll(Duration::ZERO).await?;
        let mut handled = false;
        for envelope in envelopes {
            handled |= self.receive(envelope).await?;
        }
        // Worker channels never commit their cursor; ack is a no-op here but
        // keeps the two state machines symmetrical.
        self.channel.ack(handled).await
    }

    async fn receive(&mut self, envelope: Envelope) -> Result<bool> {
        let EventPayload::CommitRequest(request) = &envelope.event.payload else {
            return Ok(false);
        };
        let commit_id = request.commit_id;
        ConnectorMetrics::incr(&self.metrics.commit_requests);

        // Close every open writer and collect its staged files.
        let mut write_results = Vec::with_capacity(self.writers.len());
        for (_, writer) in self.writers.drain() {
            write_results.push(writer.complete().await?);
        }

        // Snapshot and reset the round state in one step.
        let offsets = std::mem::take(&mut self.source_offsets);
        self.table_exists.clear();

        // The ready event lists EVERY assigned partition. Idle partitions
        // carry the null offset; the coordinator needs the full coverage to
        // decide when a round is complete.
        let assignments: Vec<TopicPartitionOffset> = self
            .context
            .assignment()
            .into_iter()
            .map(|tp| {
                let offset = offsets.get(&tp).copied().unwrap_or(Offset::NULL);
                TopicPartitionOffset {
                    topic: tp.topic,
                    partition: tp.partition,
                    offset: offset.offset,
                    timestamp_ms: offset.timestamp_ms,
                }
            })
            .collect();

        let group_id = self.config.control_group_id.clone();
        let mut events: Vec<Event> = write_results
            .into_iter()
            .map(|result| {
                Event::new(
                    group_id.clone(),
                    EventPayload::CommitResponse(CommitResponsePayload {
                        commit_id,
                        table_name: result.table_name,
                        partition: result.partition,
                        data_files: result.data_files,
                        delete_files: result.delete_files,
                    }),
                )
            })
            .collect();
        let response_count = events.len();
        events.push(Event::new(
            group_id,
            EventPayload::CommitReady(CommitReadyPayload {
                commit_id,
                assignments,
            }),
        ));

        self.channel.send(events, &offsets).await?;
        self.context.request_commit();

        info!(
            commit_id = %commit_id,
            responses = response_count,
            "Answered commit request"
        );
        Ok(true)
    }

    /// Push the control group's stored source offsets, restricted to this
    /// task's assignment, into the framework. The recovery primitive: a
    /// restarted task resumes exactly where the last committed round ended.
    pub async fn sync_commit_offsets(&self) -> Result<()> {
        let offsets = self.commit_offsets().await?;
        self.context.reset_offsets(&offsets);
        Ok(())
    }

    /// Committed source offsets for the partitions currently assigned here.
    pub async fn commit_offsets(&self) -> Result<HashMap<TopicPartition, i64>> {
        let assignment = self.context.assignment();
        self.channel
            .transport()
            .committed_offsets(&self.config.control_group_id, &assignment)
            .await
    }

    /// Close open writers, discarding staged files, then release the channel.
    pub async fn stop(mut self) -> Result<()> {
        for (table, writer) in self.writers.drain() {
            if let Err(e) = writer.close().await {
                warn!(table = %table, error = %e, "Failed to close writer");
            }
        }
        self.channel.stop().await
    }
}
