//! Kafka-backed control channel transport
//!
//! Wire-up mirrors the connector's host log: a transactional producer for
//! event publishing plus source-offset commits, a streaming consumer for the
//! control topic, and a non-subscribing consumer bound to the offsets group
//! that supplies group metadata for `send_offsets_to_transaction` and
//! answers committed-offset queries.

use super::{ChannelSpec, ChannelTransport, PolledRecord, TransportFactory};
use crate::error::{ConnectError, Result};
use crate::types::TopicPartition;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Message, Offset as KafkaOffset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Client settings shared by every channel of a task
#[derive(Debug, Clone)]
pub struct KafkaTransportConfig {
    /// Comma-separated bootstrap servers
    pub bootstrap_servers: String,
    /// Extra client properties applied to producer and consumers
    pub properties: HashMap<String, String>,
}

impl KafkaTransportConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            properties: HashMap::new(),
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }
}

/// One channel over Kafka
pub struct KafkaTransport {
    spec: ChannelSpec,
    producer: FutureProducer,
    consumer: StreamConsumer,
    /// Bound to the offsets group; never subscribes. Supplies the group
    /// metadata required to commit source offsets transactionally and
    /// answers committed-offset lookups.
    offsets_consumer: BaseConsumer,
    /// Control-topic read positions (next offset) for cursor commits
    positions: Mutex<HashMap<(String, i32), i64>>,
}

impl KafkaTransport {
    pub async fn connect(config: &KafkaTransportConfig, spec: ChannelSpec) -> Result<Self> {
        let transactional_id = format!("{}-{}", spec.group_id, Uuid::new_v4());

        let producer: FutureProducer = config
            .base_config()
            .set("transactional.id", &transactional_id)
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| ConnectError::transport(format!("producer create: {e}")))?;
        producer
            .init_transactions(TRANSACTION_TIMEOUT)
            .map_err(|e| ConnectError::transport(format!("init transactions: {e}")))?;

        let consumer: StreamConsumer = config
            .base_config()
            .set("group.id", &spec.group_id)
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                if spec.start_at_end { "latest" } else { "earliest" },
            )
            .create()
            .map_err(|e| ConnectError::transport(format!("consumer create: {e}")))?;
        consumer
            .subscribe(&[spec.control_topic.as_str()])
            .map_err(|e| ConnectError::transport(format!("subscribe: {e}")))?;

        let offsets_consumer: BaseConsumer = config
            .base_config()
            .set("group.id", &spec.offsets_group_id)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| ConnectError::transport(format!("offsets consumer create: {e}")))?;

        debug!(
            channel = %spec.channel_name,
            group = %spec.group_id,
            transactional_id = %transactional_id,
            "Connected control channel transport"
        );

        Ok(Self {
            spec,
            producer,
            consumer,
            offsets_consumer,
            positions: Mutex::new(HashMap::new()),
        })
    }

    async fn produce_and_commit(
        &self,
        records: &[Vec<u8>],
        source_offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        for value in records {
            self.producer
                .send(
                    FutureRecord::<(), [u8]>::to(&self.spec.control_topic).payload(value.as_slice()),
                    TRANSACTION_TIMEOUT,
                )
                .await
                .map_err(|(e, _)| ConnectError::transport(format!("produce: {e}")))?;
        }

        if !source_offsets.is_empty() {
            let mut tpl = TopicPartitionList::new();
            for (tp, offset) in source_offsets {
                tpl.add_partition_offset(&tp.topic, tp.partition, KafkaOffset::Offset(*offset))
                    .map_err(|e| ConnectError::transport(format!("offset list: {e}")))?;
            }
            let metadata = self.offsets_consumer.group_metadata().ok_or_else(|| {
                ConnectError::transport("control group metadata unavailable")
            })?;
            self.producer
                .send_offsets_to_transaction(&tpl, &metadata, TRANSACTION_TIMEOUT)
                .map_err(|e| ConnectError::transport(format!("send offsets: {e}")))?;
        }

        self.producer
            .commit_transaction(TRANSACTION_TIMEOUT)
            .map_err(|e| ConnectError::transport(format!("commit transaction: {e}")))
    }
}

#[async_trait]
impl ChannelTransport for KafkaTransport {
    async fn send_transactional(
        &self,
        records: Vec<Vec<u8>>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        self.producer
            .begin_transaction()
            .map_err(|e| ConnectError::transport(format!("begin transaction: {e}")))?;

        match self.produce_and_commit(&records, &source_offsets).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort_err) = self.producer.abort_transaction(TRANSACTION_TIMEOUT) {
                    warn!(
                        channel = %self.spec.channel_name,
                        error = %abort_err,
                        "Failed to abort transaction after send failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn poll(&self, timeout: Duration) -> Result<Vec<PolledRecord>> {
        let mut records = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut positions = self.positions.lock().await;

        loop {
            // Once something arrived, drain only what is already ready.
            let wait = if records.is_empty() {
                deadline
                    .saturating_duration_since(tokio::time::Instant::now())
                    .max(Duration::from_millis(1))
            } else {
                Duration::from_millis(1)
            };

            match tokio::time::timeout(wait, self.consumer.recv()).await {
                Ok(Ok(message)) => {
                    let topic = message.topic().to_string();
                    let partition = message.partition();
                    let offset = message.offset();
                    positions.insert((topic.clone(), partition), offset + 1);
                    records.push(PolledRecord {
                        topic,
                        partition,
                        offset,
                        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    });
                }
                Ok(Err(e)) => {
                    return Err(ConnectError::transport(format!("consume: {e}")));
                }
                Err(_elapsed) => break,
            }
        }
        Ok(records)
    }

    async fn commit_cursor(&self) -> Result<()> {
        let positions = self.positions.lock().await;
        if positions.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), position) in positions.iter() {
            tpl.add_partition_offset(topic, *partition, KafkaOffset::Offset(*position))
                .map_err(|e| ConnectError::transport(format!("cursor list: {e}")))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| ConnectError::transport(format!("cursor commit: {e}")))
    }

    async fn committed_offsets(
        &self,
        group_id: &str,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>> {
        if group_id != self.spec.offsets_group_id {
            return Err(ConnectError::transport(format!(
                "transport is bound to offsets group {}, not {group_id}",
                self.spec.offsets_group_id
            )));
        }

        let mut tpl = TopicPartitionList::new();
        for tp in partitions {
            tpl.add_partition(&tp.topic, tp.partition);
        }
        let committed = self
            .offsets_consumer
            .committed_offsets(tpl, METADATA_TIMEOUT)
            .map_err(|e| ConnectError::transport(format!("committed offsets: {e}")))?;

        let mut offsets = HashMap::new();
        for element in committed.elements() {
            if let KafkaOffset::Offset(offset) = element.offset() {
                offsets.insert(
                    TopicPartition::new(element.topic(), element.partition()),
                    offset,
                );
            }
        }
        Ok(offsets)
    }

    async fn partition_counts(&self, topics: &[String]) -> Result<HashMap<String, i32>> {
        let mut counts = HashMap::new();
        for topic in topics {
            let metadata = self
                .consumer
                .fetch_metadata(Some(topic), METADATA_TIMEOUT)
                .map_err(|e| ConnectError::transport(format!("metadata for {topic}: {e}")))?;
            let partitions = metadata
                .topics()
                .first()
                .map(|t| t.partitions().len() as i32)
                .unwrap_or(0);
            counts.insert(topic.clone(), partitions);
        }
        Ok(counts)
    }

    async fn close(&self) -> Result<()> {
        // Producer first so nothing new lands after the cursors stop moving.
        if let Err(e) = self.producer.flush(TRANSACTION_TIMEOUT) {
            warn!(channel = %self.spec.channel_name, error = %e, "Producer flush on close failed");
        }
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Factory handing out [`KafkaTransport`]s
#[derive(Debug, Clone)]
pub struct KafkaTransportFactory {
    config: KafkaTransportConfig,
}

impl KafkaTransportFactory {
    pub fn new(config: KafkaTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for KafkaTransportFactory {
    async fn create(&self, spec: &ChannelSpec) -> Result<Box<dyn ChannelTransport>> {
        Ok(Box::new(KafkaTransport::connect(&self.config, spec.clone()).await?))
    }
}
