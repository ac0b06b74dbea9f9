// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::MsgBus;
use crate::manager::testing::TaskSpawner;
use crate::manager::NoopSink;
use gantry_core::Op;
use serde_json::json;
use tokio::sync::mpsc;

fn sender_pair() -> (TopicSender, mpsc::Receiver<ResponseEvent>) {
    let (tx, rx) = mpsc::channel(64);
    (TopicSender::new(tx), rx)
}

#[tokio::test]
async fn subscribe_sends_fleet_snapshot() {
    let (bus, _driver) = MsgBus::new();
    let manager = WorkerManager::new(Box::new(TaskSpawner::builtin()), Box::new(NoopSink));
    manager.worker_start("WorkerTestInfinite", "alas").await.expect("start failed");

    let (sender, mut rx) = sender_pair();
    let _topic = WorkerTopic::subscribe(&bus, &manager, sender);

    let full = rx.try_recv().expect("snapshot expected");
    assert_eq!(full.op, Op::Full);
    assert_eq!(full.topic, WORKER_TOPIC);
    let snapshot = full.value.as_object().expect("object snapshot");
    assert_eq!(snapshot["alas"]["status"], json!("running"));

    manager.close().await;
}

#[tokio::test]
async fn status_transition_becomes_set() {
    let (bus, _driver) = MsgBus::new();
    let manager = WorkerManager::new(Box::new(TaskSpawner::builtin()), Box::new(NoopSink));
    let (sender, mut rx) = sender_pair();
    let topic = WorkerTopic::subscribe(&bus, &manager, sender);
    let _ = rx.try_recv();

    topic.on_global_event(WORKER_TOPIC, &json!(["alas", "scheduler-waiting"])).await;

    let event = rx.try_recv().expect("set expected");
    assert_eq!(event.op, Op::Set);
    assert_eq!(event.key, vec!["alas"]);
    assert_eq!(event.value, json!("scheduler-waiting"));

    manager.close().await;
}

#[tokio::test]
async fn idle_transition_becomes_del() {
    let (bus, _driver) = MsgBus::new();
    let manager = WorkerManager::new(Box::new(TaskSpawner::builtin()), Box::new(NoopSink));
    let (sender, mut rx) = sender_pair();
    let topic = WorkerTopic::subscribe(&bus, &manager, sender);
    let _ = rx.try_recv();

    topic.on_global_event(WORKER_TOPIC, &json!(["alas", "idle"])).await;

    let event = rx.try_recv().expect("del expected");
    assert_eq!(event.op, Op::Del);
    assert_eq!(event.key, vec!["alas"]);
    assert_eq!(event.value, serde_json::Value::Null);

    manager.close().await;
}

#[tokio::test]
async fn malformed_broadcast_is_dropped() {
    let (bus, _driver) = MsgBus::new();
    let manager = WorkerManager::new(Box::new(TaskSpawner::builtin()), Box::new(NoopSink));
    let (sender, mut rx) = sender_pair();
    let topic = WorkerTopic::subscribe(&bus, &manager, sender);
    let _ = rx.try_recv();

    topic.on_global_event(WORKER_TOPIC, &json!({"not": "a pair"})).await;

    assert!(rx.try_recv().is_err());
    manager.close().await;
}
