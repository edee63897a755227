//! Common source-log types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A source topic partition; the total-order key for offset maps
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A position in one source partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    /// Next offset to consume
    pub offset: Option<i64>,
    /// Timestamp of the record that produced this position
    pub timestamp_ms: Option<i64>,
}

impl Offset {
    /// Sentinel for partitions that saw no records in a round
    pub const NULL: Offset = Offset {
        offset: None,
        timestamp_ms: None,
    };

    pub fn new(offset: i64, timestamp_ms: Option<i64>) -> Self {
        Self {
            offset: Some(offset),
            timestamp_ms,
        }
    }

    pub fn is_null(&self) -> bool {
        self.offset.is_none()
    }
}

/// A record delivered by the sink framework
#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: Option<i64>,
    /// Record value as parsed JSON; `None` for tombstones
    pub value: Option<JsonValue>,
}

impl SinkRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
