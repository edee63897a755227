//! Sink-framework integration
//!
//! The framework owns the consume loop and partition assignment; the
//! connector reaches back through [`SinkTaskContext`]. [`SinkTaskAdapter`]
//! wires a worker (and, on the leader task, a coordinator) into the
//! framework lifecycle.

use crate::channel::{Coordinator, Worker};
use crate::error::Result;
use crate::types::{SinkRecord, TopicPartition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Callbacks into the sink framework, implemented by the embedding runtime
pub trait SinkTaskContext: Send + Sync {
    /// Source partitions currently assigned to this task.
    fn assignment(&self) -> Vec<TopicPartition>;

    /// Rewind the framework's consumer to these positions. Used to align the
    /// framework with the offsets stored under the control group.
    fn reset_offsets(&self, offsets: &HashMap<TopicPartition, i64>);

    /// Ask the framework for an offset commit at the next opportunity.
    fn request_commit(&self);
}

/// Per-task glue between the framework lifecycle and the connector core
pub struct SinkTaskAdapter {
    worker: Worker,
    /// Present only on the leader task; leader election is the framework's
    /// problem, not ours.
    coordinator: Option<Coordinator>,
}

impl SinkTaskAdapter {
    pub fn new(worker: Worker, coordinator: Option<Coordinator>) -> Self {
        Self {
            worker,
            coordinator,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.coordinator.is_some()
    }

    /// Framework delivered a record batch.
    pub async fn put(&mut self, records: &[SinkRecord]) -> Result<()> {
        self.worker.save(records).await?;
        self.worker.process().await?;
        if let Some(coordinator) = &mut self.coordinator {
            coordinator.process().await?;
        }
        Ok(())
    }

    /// Framework is about to commit offsets: hand it the authoritative
    /// positions from the control group instead.
    pub async fn pre_commit(&mut self) -> Result<HashMap<TopicPartition, i64>> {
        self.worker.commit_offsets().await
    }

    /// Framework (re)opened this task after a rebalance or restart: align
    /// its consumer with the durable cursor.
    pub async fn open(&mut self) -> Result<()> {
        self.worker.sync_commit_offsets().await
    }

    /// Framework is closing the task. Staged files are abandoned; no
    /// in-flight round is drained.
    pub async fn close(self) -> Result<()> {
        if let Some(coordinator) = self.coordinator {
            if let Err(e) = coordinator.stop().await {
                warn!(error = %e, "Coordinator stop failed");
            }
        }
        self.worker.stop().await
    }
}

/// A fixed-assignment context for embedding runtimes and tests
pub struct StaticContext {
    assignment: std::sync::Mutex<Vec<TopicPartition>>,
    resets: std::sync::Mutex<Vec<HashMap<TopicPartition, i64>>>,
    commit_requests: std::sync::atomic::AtomicU64,
}

impl StaticContext {
    pub fn new(assignment: Vec<TopicPartition>) -> Arc<Self> {
        Arc::new(Self {
            assignment: std::sync::Mutex::new(assignment),
            resets: std::sync::Mutex::new(Vec::new()),
            commit_requests: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn set_assignment(&self, assignment: Vec<TopicPartition>) {
        *self.assignment.lock().expect("assignment lock") = assignment;
    }

    /// Offset resets observed, oldest first.
    pub fn offset_resets(&self) -> Vec<HashMap<TopicPartition, i64>> {
        self.resets.lock().expect("resets lock").clone()
    }

    pub fn commit_requests(&self) -> u64 {
        self.commit_requests
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl SinkTaskContext for StaticContext {
    fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.lock().expect("assignment lock").clone()
    }

    fn reset_offsets(&self, offsets: &HashMap<TopicPartition, i64>) {
        self.resets
            .lock()
            .expect("resets lock")
            .push(offsets.clone());
    }

    fn request_commit(&self) {
        self.commit_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
