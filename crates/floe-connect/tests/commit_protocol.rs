//! End-to-end commit protocol scenarios over the in-memory log and catalog

mod common;

use common::*;
use floe_connect::catalog::{TableCatalog, SUMMARY_COMMIT_ID, SUMMARY_VTTS};
use floe_connect::channel::{Coordinator, Worker};
use floe_connect::metrics::ConnectorMetrics;
use floe_connect::task::StaticContext;
use floe_connect::testkit::{json_record, FlakyCatalog, RecordingWriterFactory};
use floe_connect::types::TopicPartition;
use floe_events::{EventPayload, EventType};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TS_BASE: i64 = 1_684_408_953_000;

/// Happy path: one table, one worker, one partition, three records.
#[tokio::test]
async fn test_single_table_round() {
    let h = harness(&[("orders", 1)], &["db.t"], &[]).await;
    let tp = TopicPartition::new("orders", 0);
    let context = StaticContext::new(vec![tp.clone()]);
    let writers = RecordingWriterFactory::new();

    let mut worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers.clone()),
        context.clone(),
        h.metrics.clone(),
    )
    .await
    .unwrap();
    let mut coordinator = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    let records = vec![
        json_record("orders", 0, 100, TS_BASE, json!({"id": 1})),
        json_record("orders", 0, 101, TS_BASE + 1, json!({"id": 2})),
        json_record("orders", 0, 102, TS_BASE + 2, json!({"id": 3})),
    ];
    worker.save(&records).await.unwrap();

    tick().await;
    coordinator.process().await.unwrap(); // opens the round
    worker.process().await.unwrap(); // answers it
    coordinator.process().await.unwrap(); // aggregates and commits

    // Exactly one snapshot carrying the round id and the vtts of the last
    // record on the only partition.
    let requests = events_of_type(&h.log, EventType::CommitRequest).await;
    assert_eq!(requests.len(), 1);
    let commit_id = requests[0].commit_id();

    let snapshots = h.catalog.snapshots("db.t").await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(
        snapshots[0].summary.get(SUMMARY_COMMIT_ID),
        Some(&commit_id.to_string())
    );
    assert_eq!(
        snapshots[0].summary.get(SUMMARY_VTTS),
        Some(&(TS_BASE + 2).to_string())
    );
    assert_eq!(snapshots[0].data_files.len(), 1);
    assert_eq!(snapshots[0].data_files[0].record_count, 3);

    // One response, one ready with the advanced offset, one commit-table,
    // one commit-complete.
    let responses = events_of_type(&h.log, EventType::CommitResponse).await;
    assert_eq!(responses.len(), 1);

    let readies = events_of_type(&h.log, EventType::CommitReady).await;
    assert_eq!(readies.len(), 1);
    let EventPayload::CommitReady(ready) = &readies[0].payload else {
        panic!("expected ready payload");
    };
    assert_eq!(ready.assignments.len(), 1);
    assert_eq!(ready.assignments[0].offset, Some(103));
    assert_eq!(ready.assignments[0].timestamp_ms, Some(TS_BASE + 2));

    let tables = events_of_type(&h.log, EventType::CommitTable).await;
    assert_eq!(tables.len(), 1);
    let completes = events_of_type(&h.log, EventType::CommitComplete).await;
    assert_eq!(completes.len(), 1);
    let EventPayload::CommitComplete(complete) = &completes[0].payload else {
        panic!("expected complete payload");
    };
    assert_eq!(complete.vtts_ms, Some(TS_BASE + 2));

    // Source offsets advanced through the transactional send.
    assert_eq!(
        h.log.committed_offset(CONTROL_GROUP, &tp).await,
        Some(103)
    );
    assert_eq!(context.commit_requests(), 1);

    // The framework realignment pushes exactly the stored offset.
    worker.sync_commit_offsets().await.unwrap();
    let resets = context.offset_resets();
    assert_eq!(resets.last().unwrap(), &HashMap::from([(tp, 103)]));
}

/// An assigned partition that saw no records still appears in the ready
/// event, with the null offset, and suppresses the round's vtts.
#[tokio::test]
async fn test_idle_partition_in_assignment() {
    let h = harness(&[("orders", 2)], &["db.t"], &[]).await;
    let tp0 = TopicPartition::new("orders", 0);
    let tp1 = TopicPartition::new("orders", 1);
    let context = StaticContext::new(vec![tp0.clone(), tp1.clone()]);
    let writers = RecordingWriterFactory::new();

    let mut worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers.clone()),
        context,
        h.metrics.clone(),
    )
    .await
    .unwrap();
    let mut coordinator = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    worker
        .save(&[json_record("orders", 0, 50, TS_BASE, json!({"id": 1}))])
        .await
        .unwrap();

    tick().await;
    coordinator.process().await.unwrap();
    worker.process().await.unwrap();
    coordinator.process().await.unwrap();

    let readies = events_of_type(&h.log, EventType::CommitReady).await;
    let EventPayload::CommitReady(ready) = &readies[0].payload else {
        panic!("expected ready payload");
    };
    let mut assignments = ready.assignments.clone();
    assignments.sort_by_key(|a| a.partition);
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].offset, Some(51));
    assert_eq!(assignments[0].timestamp_ms, Some(TS_BASE));
    assert_eq!(assignments[1].offset, None);
    assert_eq!(assignments[1].timestamp_ms, None);

    // The idle partition leaves the valid-through bound unknown.
    let completes = events_of_type(&h.log, EventType::CommitComplete).await;
    let EventPayload::CommitComplete(complete) = &completes[0].payload else {
        panic!("expected complete payload");
    };
    assert_eq!(complete.vtts_ms, None);

    // The idle partition's offset was never committed.
    assert_eq!(h.log.committed_offset(CONTROL_GROUP, &tp0).await, Some(51));
    assert_eq!(h.log.committed_offset(CONTROL_GROUP, &tp1).await, None);

    assert_eq!(h.catalog.snapshots("db.t").await.len(), 1);
}

/// Coordinator dies after the catalog commit but before announcing the
/// round. The restarted coordinator replays the in-flight round and the
/// snapshot-summary probe keeps the files from landing twice.
#[tokio::test]
async fn test_coordinator_restart_skips_applied_commit() {
    let h = harness(&[("orders", 1)], &["db.t"], &[]).await;
    let context = StaticContext::new(vec![TopicPartition::new("orders", 0)]);
    let writers = RecordingWriterFactory::new();

    let mut worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers.clone()),
        context,
        h.metrics.clone(),
    )
    .await
    .unwrap();
    let mut first = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    worker
        .save(&[json_record("orders", 0, 7, TS_BASE, json!({"id": 1}))])
        .await
        .unwrap();

    tick().await;
    first.process().await.unwrap();
    worker.process().await.unwrap();

    // Simulate the first coordinator applying the round to the catalog and
    // then dying before it could announce or advance its cursor.
    let commit_id = events_of_type(&h.log, EventType::CommitRequest).await[0].commit_id();
    let responses = events_of_type(&h.log, EventType::CommitResponse).await;
    let EventPayload::CommitResponse(response) = &responses[0].payload else {
        panic!("expected response payload");
    };
    h.catalog
        .append_files(
            &response.table_name,
            response.data_files.clone(),
            response.delete_files.clone(),
            HashMap::from([(SUMMARY_COMMIT_ID.to_string(), commit_id.to_string())]),
        )
        .await
        .unwrap();
    drop(first);

    let mut second = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();
    second.process().await.unwrap();

    // One snapshot only: the replayed commit was detected and skipped, but
    // the round was still announced.
    let snapshots = h.catalog.snapshots("db.t").await;
    assert_eq!(snapshots.len(), 1);

    let tables = events_of_type(&h.log, EventType::CommitTable).await;
    assert_eq!(tables.len(), 1);
    let EventPayload::CommitTable(table) = &tables[0].payload else {
        panic!("expected table payload");
    };
    assert_eq!(table.commit_id, commit_id);
    assert_eq!(table.snapshot_id, Some(snapshots[0].snapshot_id));

    let completes = events_of_type(&h.log, EventType::CommitComplete).await;
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].commit_id(), commit_id);
}

/// A worker that never reports within the deadline aborts the round; no
/// snapshot lands and the next round opens cleanly.
#[tokio::test]
async fn test_round_times_out_without_full_coverage() {
    let h = harness(
        &[("orders", 2)],
        &["db.t"],
        &[("iceberg.control.commit.timeout-ms", "50")],
    )
    .await;
    // This worker owns partition 0 only; partition 1's owner never answers.
    let context = StaticContext::new(vec![TopicPartition::new("orders", 0)]);
    let writers = RecordingWriterFactory::new();

    let mut worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers.clone()),
        context,
        h.metrics.clone(),
    )
    .await
    .unwrap();
    let mut coordinator = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    worker
        .save(&[json_record("orders", 0, 10, TS_BASE, json!({"id": 1}))])
        .await
        .unwrap();

    tick().await;
    coordinator.process().await.unwrap();
    worker.process().await.unwrap();
    coordinator.process().await.unwrap();
    assert!(coordinator.round_in_flight());

    tokio::time::sleep(Duration::from_millis(60)).await;
    coordinator.process().await.unwrap();
    assert!(!coordinator.round_in_flight());
    assert_eq!(ConnectorMetrics::get(&h.metrics.rounds_timed_out), 1);
    assert!(h.catalog.snapshots("db.t").await.is_empty());

    // The next tick opens a fresh round.
    coordinator.process().await.unwrap();
    assert!(coordinator.round_in_flight());
    assert_eq!(ConnectorMetrics::get(&h.metrics.rounds_started), 2);
}

/// A catalog failure fails the round without advancing the cursor; a
/// restarted coordinator replays and commits once the catalog recovers.
#[tokio::test]
async fn test_catalog_failure_is_replayable() {
    let h = harness(&[("orders", 1)], &["db.t"], &[]).await;
    let context = StaticContext::new(vec![TopicPartition::new("orders", 0)]);
    let writers = RecordingWriterFactory::new();
    let flaky = FlakyCatalog::new(h.catalog.clone());

    let mut worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers.clone()),
        context,
        h.metrics.clone(),
    )
    .await
    .unwrap();
    let mut first = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(flaky.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    worker
        .save(&[json_record("orders", 0, 3, TS_BASE, json!({"id": 1}))])
        .await
        .unwrap();

    tick().await;
    first.process().await.unwrap();
    worker.process().await.unwrap();

    flaky.fail_appends(true);
    assert!(first.process().await.is_err());
    assert!(h.catalog.snapshots("db.t").await.is_empty());
    drop(first);

    flaky.fail_appends(false);
    let mut second = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(flaky),
        h.metrics.clone(),
    )
    .await
    .unwrap();
    second.process().await.unwrap();

    let snapshots = h.catalog.snapshots("db.t").await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].data_files[0].record_count, 1);
}

/// Offset realignment is restricted to the partitions this task owns.
#[tokio::test]
async fn test_commit_offsets_filtered_by_assignment() {
    let h = harness(&[("orders", 2)], &["db.t"], &[]).await;
    let tp0 = TopicPartition::new("orders", 0);
    let tp1 = TopicPartition::new("orders", 1);
    let context = StaticContext::new(vec![tp0.clone()]);
    let writers = RecordingWriterFactory::new();

    let worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers),
        context.clone(),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    // Another task's worker owns partition 1 and has committed an offset
    // for it under the shared control group.
    let other = floe_connect::channel::ControlChannel::for_worker(&h.factory, &h.config)
        .await
        .unwrap();
    other
        .send(
            Vec::new(),
            &HashMap::from([
                (tp0.clone(), floe_connect::types::Offset::new(40, None)),
                (tp1.clone(), floe_connect::types::Offset::new(90, None)),
            ]),
        )
        .await
        .unwrap();

    let offsets = worker.commit_offsets().await.unwrap();
    assert_eq!(offsets, HashMap::from([(tp0.clone(), 40)]));

    worker.sync_commit_offsets().await.unwrap();
    assert_eq!(
        context.offset_resets().last().unwrap(),
        &HashMap::from([(tp0, 40)])
    );
}

/// The leader task adapter drives worker and coordinator through one round
/// from the framework's put/pre-commit lifecycle.
#[tokio::test]
async fn test_task_adapter_leader_round() {
    use floe_connect::task::SinkTaskAdapter;

    let h = harness(&[("orders", 1)], &["db.t"], &[]).await;
    let tp = TopicPartition::new("orders", 0);
    let context = StaticContext::new(vec![tp.clone()]);
    let writers = RecordingWriterFactory::new();

    let worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers.clone()),
        context.clone(),
        h.metrics.clone(),
    )
    .await
    .unwrap();
    let coordinator = Coordinator::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    let mut adapter = SinkTaskAdapter::new(worker, Some(coordinator));
    assert!(adapter.is_leader());

    adapter
        .put(&[json_record("orders", 0, 11, TS_BASE, json!({"id": 1}))])
        .await
        .unwrap();
    tick().await;
    // Round opens, the worker answers, the coordinator commits; empty puts
    // just keep the loop turning.
    adapter.put(&[]).await.unwrap();
    adapter.put(&[]).await.unwrap();
    adapter.put(&[]).await.unwrap();

    assert_eq!(h.catalog.snapshots("db.t").await.len(), 1);
    assert_eq!(adapter.pre_commit().await.unwrap(), HashMap::from([(tp, 12)]));

    adapter.close().await.unwrap();
}

/// Stopping a worker closes every open writer and discards staged files.
#[tokio::test]
async fn test_stop_closes_open_writers() {
    let h = harness(&[("orders", 1)], &["db.a", "db.b"], &[]).await;
    let context = StaticContext::new(vec![TopicPartition::new("orders", 0)]);
    let writers = RecordingWriterFactory::new();
    let stats = writers.stats();

    let mut worker = Worker::new(
        h.config.clone(),
        &h.factory,
        Arc::new(h.catalog.clone()),
        Arc::new(writers),
        context,
        h.metrics.clone(),
    )
    .await
    .unwrap();

    worker
        .save(&[json_record("orders", 0, 1, TS_BASE, json!({"id": 1}))])
        .await
        .unwrap();
    assert_eq!(stats.created(), 2);
    assert_eq!(stats.open(), 2);

    worker.stop().await.unwrap();
    assert_eq!(stats.closed(), 2);
    assert_eq!(stats.open(), 0);
}
