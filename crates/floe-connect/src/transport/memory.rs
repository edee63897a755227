//! In-memory log transport
//!
//! A single-process stand-in for the real log: multi-partition topics,
//! consumer-group offset storage, and atomic produce-plus-offset-commit
//! under one lock. Backs the integration tests and local development.

use super::{ChannelSpec, ChannelTransport, PolledRecord, TransportFactory};
use crate::error::{ConnectError, Result};
use crate::types::TopicPartition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct LogEntry {
    value: Vec<u8>,
    timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct LogState {
    /// topic -> partition -> entries
    topics: HashMap<String, Vec<Vec<LogEntry>>>,
    /// (group, topic-partition) -> committed offset
    group_offsets: HashMap<(String, TopicPartition), i64>,
    /// Sticky-partition rotation for keyless produces
    produce_rotation: u64,
}

impl LogState {
    fn partitions_mut(&mut self, topic: &str) -> &mut Vec<Vec<LogEntry>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new()])
    }
}

/// Shared in-memory log; clone handles freely
#[derive(Debug, Clone, Default)]
pub struct InMemoryLog {
    state: Arc<Mutex<LogState>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic with the given partition count (idempotent).
    pub async fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.state.lock().await;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    /// Append one record; returns its offset. Test seam for source data.
    pub async fn append(
        &self,
        topic: &str,
        partition: i32,
        value: Vec<u8>,
        timestamp_ms: i64,
    ) -> i64 {
        let mut state = self.state.lock().await;
        let partitions = state.partitions_mut(topic);
        let log = &mut partitions[partition as usize];
        log.push(LogEntry {
            value,
            timestamp_ms,
        });
        (log.len() - 1) as i64
    }

    /// Committed offset for a group and partition, if any.
    pub async fn committed_offset(&self, group_id: &str, tp: &TopicPartition) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .group_offsets
            .get(&(group_id.to_string(), tp.clone()))
            .copied()
    }

    /// Next offset to be assigned on a partition.
    pub async fn end_offset(&self, topic: &str, partition: i32) -> i64 {
        let mut state = self.state.lock().await;
        state.partitions_mut(topic)[partition as usize].len() as i64
    }

    /// All records currently on a partition. Test inspection seam.
    pub async fn read_all(&self, topic: &str, partition: i32) -> Vec<Vec<u8>> {
        let mut state = self.state.lock().await;
        state.partitions_mut(topic)[partition as usize]
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }
}

/// One connected channel over an [`InMemoryLog`]
pub struct InMemoryTransport {
    log: InMemoryLog,
    spec: ChannelSpec,
    /// partition -> next offset this channel will read
    cursors: Mutex<HashMap<i32, i64>>,
    closed: AtomicBool,
}

impl InMemoryTransport {
    pub async fn connect(log: InMemoryLog, spec: ChannelSpec) -> Self {
        log.create_topic(&spec.control_topic, 1).await;

        let mut cursors = HashMap::new();
        {
            let mut state = log.state.lock().await;
            let partition_count = state.partitions_mut(&spec.control_topic).len() as i32;
            for partition in 0..partition_count {
                let position = if spec.start_at_end {
                    state.partitions_mut(&spec.control_topic)[partition as usize].len() as i64
                } else {
                    let tp = TopicPartition::new(spec.control_topic.clone(), partition);
                    state
                        .group_offsets
                        .get(&(spec.group_id.clone(), tp))
                        .copied()
                        .unwrap_or(0)
                };
                cursors.insert(partition, position);
            }
        }

        Self {
            log,
            spec,
            cursors: Mutex::new(cursors),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ConnectError::transport(format!(
                "channel {} is closed",
                self.spec.channel_name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelTransport for InMemoryTransport {
    async fn send_transactional(
        &self,
        records: Vec<Vec<u8>>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        self.ensure_open()?;
        let now = floe_events::now_millis();

        // One lock scope = the transaction: all events land and all offsets
        // advance, or (on an earlier error path) none of it happened.
        let mut state = self.log.state.lock().await;
        let rotation = state.produce_rotation;
        state.produce_rotation += 1;

        let partitions = state.partitions_mut(&self.spec.control_topic);
        let partition = (rotation % partitions.len() as u64) as usize;
        for value in records {
            partitions[partition].push(LogEntry {
                value,
                timestamp_ms: now,
            });
        }

        for (tp, offset) in source_offsets {
            state
                .group_offsets
                .insert((self.spec.offsets_group_id.clone(), tp), offset);
        }
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Vec<PolledRecord>> {
        self.ensure_open()?;

        let mut records = self.drain().await;
        if records.is_empty() && !timeout.is_zero() {
            tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
            records = self.drain().await;
        }
        Ok(records)
    }

    async fn commit_cursor(&self) -> Result<()> {
        self.ensure_open()?;
        let cursors = self.cursors.lock().await;
        let mut state = self.log.state.lock().await;
        for (partition, position) in cursors.iter() {
            let tp = TopicPartition::new(self.spec.control_topic.clone(), *partition);
            state
                .group_offsets
                .insert((self.spec.group_id.clone(), tp), *position);
        }
        Ok(())
    }

    async fn committed_offsets(
        &self,
        group_id: &str,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>> {
        self.ensure_open()?;
        let state = self.log.state.lock().await;
        Ok(partitions
            .iter()
            .filter_map(|tp| {
                state
                    .group_offsets
                    .get(&(group_id.to_string(), tp.clone()))
                    .map(|offset| (tp.clone(), *offset))
            })
            .collect())
    }

    async fn partition_counts(&self, topics: &[String]) -> Result<HashMap<String, i32>> {
        self.ensure_open()?;
        let mut state = self.log.state.lock().await;
        Ok(topics
            .iter()
            .map(|topic| (topic.clone(), state.partitions_mut(topic).len() as i32))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl InMemoryTransport {
    async fn drain(&self) -> Vec<PolledRecord> {
        let mut cursors = self.cursors.lock().await;
        let mut state = self.log.state.lock().await;
        let topic = self.spec.control_topic.clone();
        let partitions = state.partitions_mut(&topic);

        let mut records = Vec::new();
        for (partition, entries) in partitions.iter().enumerate() {
            let cursor = cursors.entry(partition as i32).or_insert(0);
            while (*cursor as usize) < entries.len() {
                records.push(PolledRecord {
                    topic: topic.clone(),
                    partition: partition as i32,
                    offset: *cursor,
                    value: entries[*cursor as usize].value.clone(),
                });
                *cursor += 1;
            }
        }
        records
    }
}

/// Factory handing out [`InMemoryTransport`]s over one shared log
#[derive(Debug, Clone)]
pub struct InMemoryTransportFactory {
    log: InMemoryLog,
}

impl InMemoryTransportFactory {
    pub fn new(log: InMemoryLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &InMemoryLog {
        &self.log
    }
}

#[async_trait]
impl TransportFactory for InMemoryTransportFactory {
    async fn create(&self, spec: &ChannelSpec) -> Result<Box<dyn ChannelTransport>> {
        Ok(Box::new(
            InMemoryTransport::connect(self.log.clone(), spec.clone()).await,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, group: &str, start_at_end: bool) -> ChannelSpec {
        ChannelSpec {
            channel_name: name.to_string(),
            control_topic: "control-iceberg".to_string(),
            group_id: group.to_string(),
            offsets_group_id: "cg-control-sink".to_string(),
            start_at_end,
        }
    }

    #[tokio::test]
    async fn test_send_is_atomic_with_offsets() {
        let log = InMemoryLog::new();
        let transport =
            InMemoryTransport::connect(log.clone(), spec("worker", "cg-transient", true)).await;

        let tp = TopicPartition::new("orders", 0);
        transport
            .send_transactional(
                vec![b"e1".to_vec(), b"e2".to_vec()],
                HashMap::from([(tp.clone(), 101)]),
            )
            .await
            .unwrap();

        assert_eq!(log.read_all("control-iceberg", 0).await.len(), 2);
        assert_eq!(log.committed_offset("cg-control-sink", &tp).await, Some(101));
    }

    #[tokio::test]
    async fn test_start_at_end_skips_history() {
        let log = InMemoryLog::new();
        log.create_topic("control-iceberg", 1).await;
        log.append("control-iceberg", 0, b"old".to_vec(), 0).await;

        let late =
            InMemoryTransport::connect(log.clone(), spec("worker", "cg-transient", true)).await;
        assert!(late.poll(Duration::ZERO).await.unwrap().is_empty());

        log.append("control-iceberg", 0, b"new".to_vec(), 0).await;
        let polled = late.poll(Duration::ZERO).await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].value, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_cursor_commit_resume() {
        let log = InMemoryLog::new();
        log.create_topic("control-iceberg", 1).await;
        log.append("control-iceberg", 0, b"a".to_vec(), 0).await;
        log.append("control-iceberg", 0, b"b".to_vec(), 0).await;

        let first =
            InMemoryTransport::connect(log.clone(), spec("coordinator", "cg-coord", false)).await;
        let polled = first.poll(Duration::ZERO).await.unwrap();
        assert_eq!(polled.len(), 2);
        first.commit_cursor().await.unwrap();

        // A restarted channel under the same group resumes past the commit.
        let second =
            InMemoryTransport::connect(log.clone(), spec("coordinator", "cg-coord", false)).await;
        assert!(second.poll(Duration::ZERO).await.unwrap().is_empty());

        // But one that never committed replays from the beginning.
        let fresh =
            InMemoryTransport::connect(log.clone(), spec("coordinator", "cg-other", false)).await;
        assert_eq!(fresh.poll(Duration::ZERO).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_committed_offsets_filters_partitions() {
        let log = InMemoryLog::new();
        let transport =
            InMemoryTransport::connect(log.clone(), spec("worker", "cg-transient", true)).await;

        let tp0 = TopicPartition::new("orders", 0);
        let tp1 = TopicPartition::new("orders", 1);
        transport
            .send_transactional(vec![], HashMap::from([(tp0.clone(), 5), (tp1.clone(), 9)]))
            .await
            .unwrap();

        let only_tp0 = transport
            .committed_offsets("cg-control-sink", &[tp0.clone()])
            .await
            .unwrap();
        assert_eq!(only_tp0, HashMap::from([(tp0, 5)]));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects() {
        let log = InMemoryLog::new();
        let transport =
            InMemoryTransport::connect(log, spec("worker", "cg-transient", true)).await;
        transport.close().await.unwrap();
        assert!(transport.poll(Duration::ZERO).await.is_err());
    }
}
