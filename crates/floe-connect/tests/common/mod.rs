//! Shared harness for the commit-protocol and routing tests
#![allow(dead_code)]

use floe_connect::catalog::MemoryCatalog;
use floe_connect::config::ConnectorConfig;
use floe_connect::metrics::{ConnectorMetrics, SharedMetrics};
use floe_connect::transport::{InMemoryLog, InMemoryTransportFactory};
use floe_events::{
    decode_event, encode_event, CommitRequestPayload, Event, EventPayload, EventType,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const CONTROL_TOPIC: &str = "control-iceberg";
pub const CONTROL_GROUP: &str = "cg-control-events-sink";

pub struct Harness {
    pub log: InMemoryLog,
    pub factory: InMemoryTransportFactory,
    pub catalog: MemoryCatalog,
    pub config: Arc<ConnectorConfig>,
    pub metrics: SharedMetrics,
}

/// Extra properties applied on top of the defaults.
pub async fn harness(
    topics: &[(&str, i32)],
    tables: &[&str],
    extra: &[(&str, &str)],
) -> Harness {
    let mut props: HashMap<String, String> = HashMap::from([
        ("name".to_string(), "events-sink".to_string()),
        (
            "topics".to_string(),
            topics
                .iter()
                .map(|(t, _)| t.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ),
        // Rounds start on the first coordinator poll in tests.
        (
            "iceberg.control.commit.interval-ms".to_string(),
            "1".to_string(),
        ),
        (
            "iceberg.control.commit.timeout-ms".to_string(),
            "60000".to_string(),
        ),
    ]);
    if !tables.is_empty() {
        props.insert("iceberg.tables".to_string(), tables.join(","));
    }
    for (key, value) in extra {
        props.insert(key.to_string(), value.to_string());
    }
    let config = Arc::new(ConnectorConfig::from_properties(&props).expect("config"));

    let log = InMemoryLog::new();
    log.create_topic(CONTROL_TOPIC, 1).await;
    for (topic, partitions) in topics {
        log.create_topic(topic, *partitions).await;
    }

    let catalog = MemoryCatalog::new();
    for table in tables {
        catalog.create_table(table).await;
    }

    Harness {
        factory: InMemoryTransportFactory::new(log.clone()),
        log,
        catalog,
        config,
        metrics: ConnectorMetrics::shared(),
    }
}

/// Let the 1 ms commit interval elapse.
pub async fn tick() {
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
}

/// All decoded events currently on the control topic, oldest first.
pub async fn control_events(log: &InMemoryLog) -> Vec<Event> {
    log.read_all(CONTROL_TOPIC, 0)
        .await
        .iter()
        .map(|bytes| decode_event(bytes).expect("decodable control event"))
        .collect()
}

/// Events of one type, oldest first.
pub async fn events_of_type(log: &InMemoryLog, event_type: EventType) -> Vec<Event> {
    control_events(log)
        .await
        .into_iter()
        .filter(|e| e.event_type() == event_type)
        .collect()
}

/// Put a commit request on the control topic without running a coordinator.
pub async fn inject_commit_request(log: &InMemoryLog, commit_id: Uuid) {
    let event = Event::new(
        CONTROL_GROUP,
        EventPayload::CommitRequest(CommitRequestPayload { commit_id }),
    );
    log.append(
        CONTROL_TOPIC,
        0,
        encode_event(&event).expect("encodable event").to_vec(),
        floe_events::now_millis(),
    )
    .await;
}
