//! floe-events - Control-topic event model for the Floe Iceberg sink
//!
//! This crate defines the events exchanged between sink workers and the
//! commit coordinator over the control topic, plus their wire codec.
//!
//! # Wire Format
//!
//! Every event is a single control-topic record:
//!
//! ```text
//! ┌──────────────────┬─────────────────────────────────────────────┐
//! │ Version (1 byte) │ Fields: (tag u8, len u32 BE, payload bytes)*│
//! └──────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! Fields are tagged and length-prefixed so that readers can skip tags they
//! do not know about. This is the forward-compatibility contract: a newer
//! producer may add fields, and an older consumer must ignore them.
//!
//! # Protocol Stability
//!
//! Tag numbers are part of the wire contract. Never reuse a retired tag;
//! append new tags instead.

mod codec;
mod error;

pub use codec::{decode_event, encode_event};
pub use error::WireError;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Wire format version for compatibility checking
pub const WIRE_VERSION: u8 = 1;

/// Maximum encoded event size (8 MiB)
pub const MAX_EVENT_SIZE: usize = 8 * 1024 * 1024;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Type discriminant for control events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    /// Coordinator opens a commit round
    CommitRequest = 0,
    /// Worker reports the staged files of one table writer
    CommitResponse = 1,
    /// Worker reports its full partition assignment for the round
    CommitReady = 2,
    /// Coordinator committed (or skipped) one table snapshot
    CommitTable = 3,
    /// Coordinator finished the round
    CommitComplete = 4,
}

impl EventType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::CommitRequest),
            1 => Some(Self::CommitResponse),
            2 => Some(Self::CommitReady),
            3 => Some(Self::CommitTable),
            4 => Some(Self::CommitComplete),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommitRequest => write!(f, "commit_request"),
            Self::CommitResponse => write!(f, "commit_response"),
            Self::CommitReady => write!(f, "commit_ready"),
            Self::CommitTable => write!(f, "commit_table"),
            Self::CommitComplete => write!(f, "commit_complete"),
        }
    }
}

/// A control-topic event envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique per emission
    pub id: Uuid,
    /// Consumer group the emitter belongs to (diagnostics only)
    pub group_id: String,
    /// Emitter-local wall clock, millis since epoch
    pub timestamp_ms: i64,
    /// Typed payload
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event stamped with a fresh id and the current time.
    pub fn new(group_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            timestamp_ms: now_millis(),
            payload,
        }
    }

    /// Discriminant of the payload.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Commit round this event belongs to.
    pub fn commit_id(&self) -> Uuid {
        self.payload.commit_id()
    }
}

/// Payloads, one per [`EventType`]
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    CommitRequest(CommitRequestPayload),
    CommitResponse(CommitResponsePayload),
    CommitReady(CommitReadyPayload),
    CommitTable(CommitTablePayload),
    CommitComplete(CommitCompletePayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::CommitRequest(_) => EventType::CommitRequest,
            Self::CommitResponse(_) => EventType::CommitResponse,
            Self::CommitReady(_) => EventType::CommitReady,
            Self::CommitTable(_) => EventType::CommitTable,
            Self::CommitComplete(_) => EventType::CommitComplete,
        }
    }

    pub fn commit_id(&self) -> Uuid {
        match self {
            Self::CommitRequest(p) => p.commit_id,
            Self::CommitResponse(p) => p.commit_id,
            Self::CommitReady(p) => p.commit_id,
            Self::CommitTable(p) => p.commit_id,
            Self::CommitComplete(p) => p.commit_id,
        }
    }
}

/// Opens a commit round
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequestPayload {
    pub commit_id: Uuid,
}

/// Staged files of one per-table writer, one per (worker x table)
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResponsePayload {
    pub commit_id: Uuid,
    pub table_name: TableName,
    /// Partition tuple shared by the staged files (empty when unpartitioned)
    pub partition: serde_json::Value,
    pub data_files: Vec<DataFileDescriptor>,
    pub delete_files: Vec<DataFileDescriptor>,
}

/// One per worker per round; lists every assigned partition, including ones
/// that saw no records (null offset)
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReadyPayload {
    pub commit_id: Uuid,
    pub assignments: Vec<TopicPartitionOffset>,
}

/// Emitted by the coordinator after each table snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CommitTablePayload {
    pub commit_id: Uuid,
    pub table_name: TableName,
    pub snapshot_id: Option<i64>,
    /// Valid-through timestamp: lower bound across the round's assignments
    pub vtts_ms: Option<i64>,
}

/// Emitted last in a round
#[derive(Debug, Clone, PartialEq)]
pub struct CommitCompletePayload {
    pub commit_id: Uuid,
    pub vtts_ms: Option<i64>,
}

/// A source position embedded in [`CommitReadyPayload`]
#[derive(Debug, Clone, PartialEq)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    /// Next offset to consume; `None` when the partition saw no records
    pub offset: Option<i64>,
    pub timestamp_ms: Option<i64>,
}

/// Destination table identity: namespace levels plus a table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub namespace: Vec<String>,
    pub name: String,
}

impl TableName {
    pub fn new(namespace: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// Parse a dotted identifier; the last segment is the table name.
    pub fn parse(identifier: &str) -> Self {
        let mut parts: Vec<String> = identifier.split('.').map(str::to_string).collect();
        let name = parts.pop().unwrap_or_default();
        Self {
            namespace: parts,
            name,
        }
    }

    /// Dotted identifier form, e.g. `db.events`.
    pub fn identifier(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace.join("."), self.name)
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// Content kind of a staged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileContent {
    Data,
    PositionDeletes,
    EqualityDeletes,
}

/// Portable description of a staged data or delete file.
///
/// Workers stage files locally and ship these descriptors over the control
/// topic; the coordinator rebuilds catalog-native file metadata from them at
/// commit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFileDescriptor {
    pub content: FileContent,
    pub file_path: String,
    pub file_format: String,
    #[serde(default)]
    pub partition: serde_json::Value,
    pub record_count: u64,
    pub file_size_bytes: u64,
    #[serde(default)]
    pub equality_ids: Vec<i32>,
    #[serde(default)]
    pub sort_order_id: Option<i32>,
}

impl DataFileDescriptor {
    /// A parquet data file with no partition tuple.
    pub fn data(file_path: impl Into<String>, record_count: u64, file_size_bytes: u64) -> Self {
        Self {
            content: FileContent::Data,
            file_path: file_path.into(),
            file_format: "parquet".to_string(),
            partition: serde_json::Value::Null,
            record_count,
            file_size_bytes,
            equality_ids: Vec::new(),
            sort_order_id: None,
        }
    }
}
