//! Control-channel transport abstraction
//!
//! The worker and coordinator state machines never talk to a log client
//! directly; they consume a small capability set. The one non-negotiable
//! capability is [`ChannelTransport::send_transactional`]: events are
//! produced to the control topic AND the given source offsets are committed
//! under the offsets group as a single atomic unit. Exactly-once across task
//! restarts rests entirely on that atomicity.

mod memory;

#[cfg(feature = "kafka")]
mod kafka;

pub use memory::{InMemoryLog, InMemoryTransport, InMemoryTransportFactory};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaTransportConfig, KafkaTransportFactory};

use crate::error::Result;
use crate::types::TopicPartition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A raw control-topic record handed back from [`ChannelTransport::poll`]
#[derive(Debug, Clone)]
pub struct PolledRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Vec<u8>,
}

/// Construction parameters for one channel's transport
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    /// Channel name for diagnostics ("worker", "coordinator")
    pub channel_name: String,
    /// Control topic to produce to and consume from
    pub control_topic: String,
    /// Consumer group for this channel's control-topic cursor
    pub group_id: String,
    /// Group under which `send_transactional` commits source offsets
    /// (always the coordinator's stable group)
    pub offsets_group_id: String,
    /// Start consuming at the current end of the control topic instead of
    /// the group's committed position. Workers set this: they must observe
    /// every future commit request regardless of restart history.
    pub start_at_end: bool,
}

/// Capability set the control channel needs from the log
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Produce `records` to the control topic and commit `source_offsets`
    /// (partition -> next offset to consume) under the offsets group, as one
    /// transaction. On failure neither side may be visible.
    async fn send_transactional(
        &self,
        records: Vec<Vec<u8>>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()>;

    /// Drain control-topic records that are ready within `timeout`.
    async fn poll(&self, timeout: Duration) -> Result<Vec<PolledRecord>>;

    /// Commit this channel's control-topic read position under its group.
    async fn commit_cursor(&self) -> Result<()>;

    /// Committed offsets stored for `group_id`, restricted to `partitions`.
    async fn committed_offsets(
        &self,
        group_id: &str,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>>;

    /// Partition count per topic.
    async fn partition_counts(&self, topics: &[String]) -> Result<HashMap<String, i32>>;

    /// Release producer, consumer, and admin resources.
    async fn close(&self) -> Result<()>;
}

/// Creates transports; lets tests swap the log out for an in-memory one
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, spec: &ChannelSpec) -> Result<Box<dyn ChannelTransport>>;
}
