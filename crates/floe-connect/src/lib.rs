//! floe-connect - Iceberg sink connector runtime
//!
//! Ingests a partitioned, ordered record log and commits it as atomic
//! snapshots into Iceberg tables. A cohort of stateless worker tasks owns
//! disjoint source partitions; a singleton coordinator turns their
//! independently staged files into globally consistent, crash-safe,
//! exactly-once table commits.
//!
//! # Architecture
//!
//! ```text
//! source partitions -> sink framework -> Worker::save -> per-table writers
//!                                           |
//!              COMMIT_REQUEST (control topic, from Coordinator timer)
//!                                           v
//!          Workers close writers, emit CommitResponse + CommitReady
//!          and advance source offsets in the SAME transaction
//!                                           |
//!                                           v
//!          Coordinator aggregates by round id, checks partition
//!          coverage, commits per table (idempotent via snapshot
//!          summary), emits CommitTable* + CommitComplete
//! ```
//!
//! Leadership, record delivery, and offset checkpointing belong to the
//! embedding sink framework; it reaches the core through
//! [`task::SinkTaskContext`] and [`task::SinkTaskAdapter`].

pub mod catalog;
pub mod channel;
pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod task;
pub mod testkit;
pub mod transport;
pub mod types;

// Re-export the wire event model under one roof.
pub use floe_events as events;

pub use catalog::{IcebergCatalog, MemoryCatalog, TableCatalog};
pub use channel::{ControlChannel, Coordinator, Envelope, Worker};
pub use config::ConnectorConfig;
pub use data::{RecordWriter, WriterFactory, WriterResult};
pub use error::{ConnectError, DataError, DataResult, Result};
pub use metrics::{ConnectorMetrics, SharedMetrics};
pub use task::{SinkTaskAdapter, SinkTaskContext, StaticContext};
pub use transport::{ChannelSpec, ChannelTransport, InMemoryLog, TransportFactory};
pub use types::{Offset, SinkRecord, TopicPartition};
