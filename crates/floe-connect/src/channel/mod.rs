//! Control channel
//!
//! A durable, at-least-once, per-partition-ordered bus over the control
//! topic, shared by the worker and coordinator state machines. The channel
//! owns a transport and adds the two disciplines the commit protocol needs:
//!
//! - `send` produces events AND commits source offsets as one transaction;
//!   source offsets advance through no other path.
//! - Only the coordinator commits its control-topic cursor, and only after
//!   it has finished acting on a drained batch. Workers read from the end of
//!   the topic under throwaway groups and never commit.

mod coordinator;
mod worker;

pub use coordinator::{Coordinator, CommitState};
pub use worker::Worker;

use crate::config::ConnectorConfig;
use crate::error::Result;
use crate::transport::{ChannelSpec, ChannelTransport, TransportFactory};
use crate::types::{Offset, TopicPartition};
use floe_events::{decode_event, encode_event, Event};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// A decoded control-topic record plus its position
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One endpoint on the control topic
pub struct ControlChannel {
    name: String,
    transport: Box<dyn ChannelTransport>,
    /// Coordinator-only: commit the read cursor after handled batches
    cursor_commits: bool,
}

impl ControlChannel {
    /// Channel for the coordinator: stable group, resumes from its committed
    /// cursor, commits the cursor as rounds are processed.
    pub async fn for_coordinator(
        factory: &dyn TransportFactory,
        config: &ConnectorConfig,
    ) -> Result<Self> {
        let spec = ChannelSpec {
            channel_name: "coordinator".to_string(),
            control_topic: config.control_topic.clone(),
            group_id: config.control_group_id.clone(),
            offsets_group_id: config.control_group_id.clone(),
            start_at_end: false,
        };
        Ok(Self {
            name: spec.channel_name.clone(),
            transport: factory.create(&spec).await?,
            cursor_commits: true,
        })
    }

    /// Channel for a worker: transient group, starts at the end of the
    /// control topic, never commits its cursor.
    pub async fn for_worker(
        factory: &dyn TransportFactory,
        config: &ConnectorConfig,
    ) -> Result<Self> {
        let spec = ChannelSpec {
            channel_name: "worker".to_string(),
            control_topic: config.control_topic.clone(),
            group_id: config.transient_control_group_id(),
            offsets_group_id: config.control_group_id.clone(),
            start_at_end: true,
        };
        Ok(Self {
            name: spec.channel_name.clone(),
            transport: factory.create(&spec).await?,
            cursor_commits: false,
        })
    }

    /// Transactionally produce `events` and commit the non-null
    /// `source_offsets` under the coordinator group.
    pub async fn send(
        &self,
        events: Vec<Event>,
        source_offsets: &HashMap<TopicPartition, Offset>,
    ) -> Result<()> {
        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            records.push(encode_event(event)?.to_vec());
        }
        let offsets = source_offsets
            .iter()
            .filter_map(|(tp, offset)| offset.offset.map(|o| (tp.clone(), o)))
            .collect();
        self.transport.send_transactional(records, offsets).await
    }

    /// Drain ready control records into envelopes. Records that fail to
    /// decode are logged and skipped; a malformed record must not wedge the
    /// channel.
    pub async fn poll(&self, timeout: Duration) -> Result<Vec<Envelope>> {
        let polled = self.transport.poll(timeout).await?;
        let mut envelopes = Vec::with_capacity(polled.len());
        for record in polled {
            match decode_event(&record.value) {
                Ok(event) => {
                    debug!(
                        channel = %self.name,
                        event_type = %event.event_type(),
                        offset = record.offset,
                        "Received control event"
                    );
                    envelopes.push(Envelope {
                        event,
                        topic: record.topic,
                        partition: record.partition,
                        offset: record.offset,
                    });
                }
                Err(e) => {
                    warn!(
                        channel = %self.name,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping undecodable control record"
                    );
                }
            }
        }
        Ok(envelopes)
    }

    /// Commit the control-topic cursor if this channel does cursor commits
    /// and anything was handled.
    pub async fn ack(&self, handled: bool) -> Result<()> {
        if handled && self.cursor_commits {
            self.transport.commit_cursor().await?;
        }
        Ok(())
    }

    /// Direct transport access for offset queries and metadata.
    pub fn transport(&self) -> &dyn ChannelTransport {
        self.transport.as_ref()
    }

    /// Release transport resources. Safe to call on every exit path.
    pub async fn stop(self) -> Result<()> {
        self.transport.close().await
    }
}
