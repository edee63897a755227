//! Coordinator state machine
//!
//! Runs on exactly one task (leader election is delegated to the embedding
//! framework). Opens commit rounds on a timer, aggregates worker responses
//! by round id, declares a round complete when the readies' partition
//! coverage spans every source partition, and applies the round to the
//! catalog one table at a time in lexicographic order.
//!
//! Crash safety: the control-topic cursor is committed only after a round's
//! catalog work finished. A coordinator that dies mid-commit replays the
//! responses on restart and the snapshot-summary probe keeps the replay from
//! double-applying files.

use crate::catalog::{TableCatalog, SUMMARY_COMMIT_ID, SUMMARY_VTTS};
use crate::channel::{ControlChannel, Envelope};
use crate::config::ConnectorConfig;
use crate::error::Result;
use crate::metrics::{ConnectorMetrics, SharedMetrics};
use crate::transport::TransportFactory;
use crate::types::TopicPartition;
use floe_events::{
    CommitCompletePayload, CommitReadyPayload, CommitRequestPayload, CommitResponsePayload,
    CommitTablePayload, Event, EventPayload, TableName,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// In-flight round bookkeeping; exists only between request and completion
pub struct CommitState {
    pub commit_id: Uuid,
    pub started_at: Instant,
    pub responses: Vec<CommitResponsePayload>,
    pub readies: Vec<CommitReadyPayload>,
}

impl CommitState {
    fn new(commit_id: Uuid) -> Self {
        Self {
            commit_id,
            started_at: Instant::now(),
            responses: Vec::new(),
            readies: Vec::new(),
        }
    }

    /// Partitions covered by the readies received so far.
    fn covered_partitions(&self) -> HashSet<TopicPartition> {
        self.readies
            .iter()
            .flat_map(|ready| ready.assignments.iter())
            .map(|a| TopicPartition::new(a.topic.clone(), a.partition))
            .collect()
    }

    /// Valid-through timestamp: the minimum assignment timestamp, defined
    /// only when every assignment carries one. A partition with no data in
    /// the round leaves the bound unknown.
    fn vtts(&self) -> Option<i64> {
        self.readies
            .iter()
            .flat_map(|ready| ready.assignments.iter())
            .map(|a| a.timestamp_ms)
            .collect::<Option<Vec<i64>>>()
            .and_then(|ts| ts.into_iter().min())
    }
}

pub struct Coordinator {
    config: Arc<ConnectorConfig>,
    channel: ControlChannel,
    catalog: Arc<dyn TableCatalog>,
    metrics: SharedMetrics,
    /// Every partition of every configured source topic; refreshed at the
    /// start of each round so partition expansion is picked up.
    source_partitions: HashSet<TopicPartition>,
    state: Option<CommitState>,
    last_commit: Instant,
}

impl Coordinator {
    pub async fn new(
        config: Arc<ConnectorConfig>,
        factory: &dyn TransportFactory,
        catalog: Arc<dyn TableCatalog>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let channel = ControlChannel::for_coordinator(factory, &config).await?;
        Ok(Self {
            config,
            channel,
            catalog,
            metrics,
            source_partitions: HashSet::new(),
            state: None,
            last_commit: Instant::now(),
        })
    }

    /// One cooperative step: drain the channel, maybe open a round, then
    /// evaluate completion and timeout. Called from the task's poll loop.
    /// Draining comes first so that a replayed in-flight round is adopted
    /// before the timer can open a competing one.
    pub async fn process(&mut self) -> Result<()> {
        let envelopes = self.channel.poll(Duration::ZERO).await?;
        let mut handled = false;
        for envelope in envelopes {
            handled |= self.receive(envelope);
        }

        if self.state.is_none() && self.last_commit.elapsed() >= self.config.commit_interval {
            self.begin_round().await?;
        }

        self.evaluate_round().await?;

        // Cursor moves only after the round work above succeeded; a crash
        // before this point replays the drained responses on restart.
        self.channel.ack(handled).await
    }

    async fn refresh_source_partitions(&mut self) -> Result<()> {
        let counts = self
            .channel
            .transport()
            .partition_counts(&self.config.source_topics)
            .await?;
        self.source_partitions = counts
            .into_iter()
            .flat_map(|(topic, partitions)| {
                (0..partitions).map(move |p| TopicPartition::new(topic.clone(), p))
            })
            .collect();
        Ok(())
    }

    async fn begin_round(&mut self) -> Result<()> {
        self.refresh_source_partitions().await?;

        let commit_id = Uuid::new_v4();
        let request = Event::new(
            self.config.control_group_id.clone(),
            EventPayload::CommitRequest(CommitRequestPayload { commit_id }),
        );
        self.channel.send(vec![request], &HashMap::new()).await?;

        self.state = Some(CommitState::new(commit_id));
        ConnectorMetrics::incr(&self.metrics.rounds_started);
        info!(
            commit_id = %commit_id,
            expected_partitions = self.source_partitions.len(),
            "Started commit round"
        );
        Ok(())
    }

    /// Fold one envelope into the open round. Stragglers from completed
    /// rounds and the coordinator's own emissions are dropped.
    fn receive(&mut self, envelope: Envelope) -> bool {
        match envelope.event.payload {
            EventPayload::CommitRequest(payload) => {
                // The cursor only advances past a request once its round
                // completed, so a request with no open round is our own,
                // replayed after a crash: adopt it and let the round's
                // responses reapply.
                if self.state.is_none() {
                    info!(
                        commit_id = %payload.commit_id,
                        "Adopting replayed in-flight commit round"
                    );
                    self.state = Some(CommitState::new(payload.commit_id));
                    return true;
                }
                false
            }
            EventPayload::CommitResponse(payload) => {
                let Some(state) = &mut self.state else {
                    return false;
                };
                if payload.commit_id != state.commit_id {
                    debug!(
                        commit_id = %payload.commit_id,
                        "Dropping commit response from a previous round"
                    );
                    return false;
                }
                state.responses.push(payload);
                true
            }
            EventPayload::CommitReady(payload) => {
                let Some(state) = &mut self.state else {
                    return false;
                };
                if payload.commit_id != state.commit_id {
                    debug!(
                        commit_id = %payload.commit_id,
                        "Dropping commit ready from a previous round"
                    );
                    return false;
                }
                state.readies.push(payload);
                true
            }
            _ => false,
        }
    }

    async fn evaluate_round(&mut self) -> Result<()> {
        if self.state.is_some() && self.source_partitions.is_empty() {
            // An adopted round starts with no expected-partition set.
            self.refresh_source_partitions().await?;
        }
        let Some(state) = &self.state else {
            return Ok(());
        };

        let complete = !self.source_partitions.is_empty()
            && state.covered_partitions().is_superset(&self.source_partitions);

        if complete {
            let state = match self.state.take() {
                Some(state) => state,
                None => return Ok(()),
            };
            // A catalog failure propagates as a task failure with the cursor
            // uncommitted: the restarted coordinator replays the responses
            // and the summary probe skips whatever already landed.
            self.commit_round(state).await?;
            self.last_commit = Instant::now();
            ConnectorMetrics::incr(&self.metrics.rounds_committed);
        } else if state.started_at.elapsed() > self.config.commit_timeout {
            warn!(
                commit_id = %state.commit_id,
                covered = state.covered_partitions().len(),
                expected = self.source_partitions.len(),
                "Commit round timed out; discarding"
            );
            self.state = None;
            ConnectorMetrics::incr(&self.metrics.rounds_timed_out);
        }
        Ok(())
    }

    async fn commit_round(&mut self, state: CommitState) -> Result<()> {
        let commit_id = state.commit_id;
        let vtts = state.vtts();

        // Deterministic commit order: lexicographic table identifier.
        let mut by_table: BTreeMap<TableName, Vec<CommitResponsePayload>> = BTreeMap::new();
        for response in state.responses {
            by_table
                .entry(response.table_name.clone())
                .or_default()
                .push(response);
        }

        let group_id = self.config.control_group_id.clone();
        let mut events = Vec::with_capacity(by_table.len() + 1);

        for (table, responses) in by_table {
            let snapshot_id = self
                .commit_table(&table, commit_id, vtts, responses)
                .await?;
            events.push(Event::new(
                group_id.clone(),
                EventPayload::CommitTable(CommitTablePayload {
                    commit_id,
                    table_name: table,
                    snapshot_id,
                    vtts_ms: vtts,
                }),
            ));
        }

        events.push(Event::new(
            group_id,
            EventPayload::CommitComplete(CommitCompletePayload {
                commit_id,
                vtts_ms: vtts,
            }),
        ));
        self.channel.send(events, &HashMap::new()).await?;

        info!(commit_id = %commit_id, vtts = ?vtts, "Commit round complete");
        Ok(())
    }

    /// Commit one table's files; returns the snapshot id, or `None` when
    /// there was nothing to commit.
    async fn commit_table(
        &self,
        table: &TableName,
        commit_id: Uuid,
        vtts: Option<i64>,
        responses: Vec<CommitResponsePayload>,
    ) -> Result<Option<i64>> {
        let mut data_files = Vec::new();
        let mut delete_files = Vec::new();
        for response in responses {
            data_files.extend(response.data_files);
            delete_files.extend(response.delete_files);
        }

        if data_files.is_empty() && delete_files.is_empty() {
            debug!(table = %table, commit_id = %commit_id, "Nothing to commit");
            return Ok(None);
        }

        // Idempotence probe: a snapshot already carrying this round's id
        // means a previous coordinator incarnation got here first.
        if let Some(existing) = self
            .catalog
            .snapshot_for_commit(table, &commit_id.to_string())
            .await?
        {
            info!(
                table = %table,
                commit_id = %commit_id,
                snapshot_id = existing,
                "Round already applied to table; skipping catalog commit"
            );
            return Ok(Some(existing));
        }

        let file_count = (data_files.len() + delete_files.len()) as u64;
        let mut summary = HashMap::from([(
            SUMMARY_COMMIT_ID.to_string(),
            commit_id.to_string(),
        )]);
        if let Some(vtts) = vtts {
            summary.insert(SUMMARY_VTTS.to_string(), vtts.to_string());
        }

        let snapshot_id = match self
            .catalog
            .append_files(table, data_files, delete_files, summary)
            .await
        {
            Ok(snapshot_id) => snapshot_id,
            Err(e) => {
                error!(
                    table = %table,
                    commit_id = %commit_id,
                    error = %e,
                    "Catalog commit failed; round abandoned"
                );
                return Err(e);
            }
        };

        ConnectorMetrics::add(&self.metrics.files_committed, file_count);
        info!(
            table = %table,
            commit_id = %commit_id,
            snapshot_id,
            files = file_count,
            "Committed table snapshot"
        );
        Ok(Some(snapshot_id))
    }

    /// Whether a round is currently open. Diagnostics only.
    pub fn round_in_flight(&self) -> bool {
        self.state.is_some()
    }

    pub async fn stop(self) -> Result<()> {
        self.channel.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_events::TopicPartitionOffset;

    fn assignment(partition: i32, offset: Option<i64>, ts: Option<i64>) -> TopicPartitionOffset {
        TopicPartitionOffset {
            topic: "orders".to_string(),
            partition,
            offset,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_covered_partitions_unions_readies() {
        let commit_id = Uuid::new_v4();
        let mut state = CommitState::new(commit_id);
        state.readies.push(CommitReadyPayload {
            commit_id,
            assignments: vec![assignment(0, Some(10), Some(1)), assignment(1, None, None)],
        });
        state.readies.push(CommitReadyPayload {
            commit_id,
            assignments: vec![assignment(2, Some(5), Some(2))],
        });

        let covered = state.covered_partitions();
        assert_eq!(covered.len(), 3);
        assert!(covered.contains(&TopicPartition::new("orders", 1)));
    }

    #[test]
    fn test_vtts_is_min_when_all_partitions_have_data() {
        let commit_id = Uuid::new_v4();
        let mut state = CommitState::new(commit_id);
        state.readies.push(CommitReadyPayload {
            commit_id,
            assignments: vec![
                assignment(0, Some(10), Some(500)),
                assignment(1, Some(20), Some(300)),
            ],
        });
        assert_eq!(state.vtts(), Some(300));
    }

    #[test]
    fn test_vtts_unknown_with_idle_partition() {
        let commit_id = Uuid::new_v4();
        let mut state = CommitState::new(commit_id);
        state.readies.push(CommitReadyPayload {
            commit_id,
            assignments: vec![assignment(0, Some(10), Some(500)), assignment(1, None, None)],
        });
        assert_eq!(state.vtts(), None);
    }
}
