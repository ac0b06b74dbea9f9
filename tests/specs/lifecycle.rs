// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end worker lifecycle scenarios.

use gantry_core::WorkerStatus;
use gantry_daemon::manager::testing::TaskSpawner;
use gantry_daemon::{NoopSink, WorkerManager};
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn manager() -> WorkerManager {
    WorkerManager::new(Box::new(TaskSpawner::builtin()), Box::new(NoopSink))
}

async fn wait_until(limit: Duration, what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn happy_start_runs_and_clears() {
    let manager = manager();

    manager.worker_start("WorkerTestRun3", "alas").await.expect("start failed");
    assert_eq!(manager.status("alas"), WorkerStatus::Running);

    // Worker emits three logs, exits 0; within a bounded time the entry is
    // removed and the status reads idle again
    wait_until(Duration::from_secs(2), "worker cleanup", || !manager.has_entry("alas")).await;
    assert_eq!(manager.status("alas"), WorkerStatus::Idle);

    manager.close().await;
}

#[tokio::test]
async fn crash_path_retains_error_state() {
    let manager = manager();

    manager.worker_start("WorkerTestError", "alas").await.expect("start failed");

    wait_until(Duration::from_secs(2), "error status", || {
        manager.status("alas") == WorkerStatus::Error
    })
    .await;

    // The entry stays so the failure is inspectable
    assert!(manager.has_entry("alas"));
    let info = manager.get_state_info();
    assert_eq!(info["alas"].status, WorkerStatus::Error);

    manager.close().await;
}

#[tokio::test]
async fn scheduler_stop_sequence() {
    let manager = manager();

    manager.worker_start("WorkerTestScheduler", "alas").await.expect("start failed");
    wait_until(Duration::from_secs(2), "running", || {
        manager.status("alas").is_self_reportable()
    })
    .await;

    manager.worker_scheduler_stop("alas").expect("scheduler stop failed");
    assert_eq!(manager.status("alas"), WorkerStatus::SchedulerStopping);

    wait_until(Duration::from_secs(5), "clean exit", || !manager.has_entry("alas")).await;
    assert_eq!(manager.status("alas"), WorkerStatus::Idle);

    manager.close().await;
}

#[tokio::test]
async fn force_kill_during_work() {
    let manager = manager();

    manager.worker_start("WorkerTestInfinite", "alas").await.expect("start failed");
    assert_eq!(manager.status("alas"), WorkerStatus::Running);

    let started = Instant::now();
    manager.worker_force_kill("alas").await.expect("force kill failed");
    assert!(started.elapsed() < Duration::from_secs(2), "force kill must be prompt");

    assert!(!manager.has_entry("alas"));
    assert_eq!(manager.status("alas"), WorkerStatus::Idle);

    manager.close().await;
}
