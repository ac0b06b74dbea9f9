// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end log streaming: worker → manager → log cache → topic.

use gantry_core::{Op, ResponseEvent};
use gantry_daemon::backend::BusSink;
use gantry_daemon::bus::{LogCacheRegistry, MsgBus, TopicSender};
use gantry_daemon::manager::testing::TaskSpawner;
use gantry_daemon::topic::LogTopic;
use gantry_daemon::WorkerManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Stack {
    manager: WorkerManager,
    logs: Arc<LogCacheRegistry>,
}

fn stack() -> Stack {
    let (bus, driver) = MsgBus::new();
    let (logs, drainer) = LogCacheRegistry::new();
    tokio::spawn(driver.run());
    tokio::spawn(drainer.run());

    let sink = BusSink::new(bus, Arc::clone(&logs));
    let manager = WorkerManager::new(Box::new(TaskSpawner::builtin()), Box::new(sink));
    Stack { manager, logs }
}

fn subscriber() -> (TopicSender, mpsc::Receiver<ResponseEvent>) {
    let (tx, rx) = mpsc::channel(1024);
    (TopicSender::new(tx), rx)
}

async fn next_payload(rx: &mut mpsc::Receiver<ResponseEvent>) -> ResponseEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("stream closed")
}

fn payload_values(payload: &ResponseEvent) -> Vec<serde_json::Value> {
    payload.value.as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn subscriber_sees_full_then_batched_deltas() {
    let stack = stack();
    let (sender, mut rx) = subscriber();

    // Subscribe before the worker starts: snapshot is empty
    let topic = LogTopic::subscribe(&stack.logs, "alas", sender);
    let full = next_payload(&mut rx).await;
    assert_eq!(full.op, Op::Full);
    assert!(payload_values(&full).is_empty());

    stack.manager.worker_start("WorkerTestRun3", "alas").await.expect("start failed");

    // Exactly three records arrive, in order, as at most three add batches
    let mut records = Vec::new();
    let mut batches = 0;
    while records.len() < 3 {
        let payload = next_payload(&mut rx).await;
        assert_eq!(payload.op, Op::Add, "no payload may precede or replace the full");
        batches += 1;
        records.extend(payload_values(&payload));
    }
    assert_eq!(records.len(), 3);
    assert!(batches <= 3);
    let expected: Vec<serde_json::Value> =
        (0..3).map(|n| serde_json::Value::from(n.to_string())).collect();
    assert_eq!(records, expected);

    topic.unsubscribe();
    stack.manager.close().await;
}

#[tokio::test]
async fn late_subscriber_gets_history_in_the_snapshot() {
    let stack = stack();

    stack.manager.worker_start("WorkerTestRun3", "alas").await.expect("start failed");
    // Let the worker finish: all three records are history now
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while stack.manager.has_entry("alas") {
        assert!(tokio::time::Instant::now() < deadline, "worker never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (sender, mut rx) = subscriber();
    let topic = LogTopic::subscribe(&stack.logs, "alas", sender);

    let full = next_payload(&mut rx).await;
    assert_eq!(full.op, Op::Full);
    assert_eq!(payload_values(&full).len(), 3);

    topic.unsubscribe();
    stack.manager.close().await;
}

#[tokio::test]
async fn mid_stream_subscription_never_repeats_or_drops_records() {
    let stack = stack();

    stack.manager.worker_start("WorkerTestInfinite", "alas").await.expect("start failed");

    // Let some records accumulate as history
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (sender, mut rx) = subscriber();
    let topic = LogTopic::subscribe(&stack.logs, "alas", sender);

    let full = next_payload(&mut rx).await;
    assert_eq!(full.op, Op::Full, "the very first payload must be the snapshot");

    let mut seen: Vec<i64> = payload_values(&full)
        .iter()
        .map(|v| v.as_str().and_then(|s| s.parse().ok()).expect("numeric record"))
        .collect();
    assert!(!seen.is_empty(), "history expected before subscription");

    // Follow the live stream for a few batches
    while seen.len() < 30 {
        let payload = next_payload(&mut rx).await;
        assert_eq!(payload.op, Op::Add);
        for value in payload_values(&payload) {
            seen.push(value.as_str().and_then(|s| s.parse().ok()).expect("numeric record"));
        }
    }

    // Snapshot + deltas form one contiguous sequence: nothing lost, nothing
    // repeated, nothing reordered across the subscription boundary
    for pair in seen.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "discontinuity at {pair:?}");
    }

    topic.unsubscribe();
    stack.manager.worker_force_kill("alas").await.expect("force kill failed");
    stack.manager.close().await;
}
