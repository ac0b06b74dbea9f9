// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_core::{Command, CommandEvent, ConfigEvent};
use gantry_wire::{read_frame, write_frame};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::time::timeout;

fn pipes() -> (DuplexStream, DuplexStream, DuplexStream, DuplexStream) {
    let (cmd_backend, cmd_worker) = tokio::io::duplex(64 * 1024);
    let (event_worker, event_backend) = tokio::io::duplex(64 * 1024);
    (cmd_backend, cmd_worker, event_worker, event_backend)
}

#[tokio::test]
async fn run3_exits_zero() {
    let (_cmd_backend, cmd_worker, event_worker, mut event_backend) = pipes();

    let registry = ModRegistry::builtin();
    let worker =
        tokio::spawn(
            async move { run_worker("WorkerTestRun3", "alas", cmd_worker, event_worker, &registry).await },
        );

    // init + three logs
    for _ in 0..4 {
        let _: ConfigEvent =
            timeout(Duration::from_secs(2), read_frame(&mut event_backend))
                .await
                .expect("missing event")
                .expect("pipe closed");
    }

    let code = timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker hung")
        .expect("task panicked");
    assert_eq!(code, EXIT_OK);
}

#[tokio::test]
async fn unknown_mod_exits_with_error() {
    let (_cmd_backend, cmd_worker, event_worker, _event_backend) = pipes();
    let registry = ModRegistry::builtin();

    let code = run_worker("NoSuchMod", "alas", cmd_worker, event_worker, &registry).await;
    assert_eq!(code, EXIT_ERROR);
}

#[tokio::test]
async fn failing_mod_exits_with_error() {
    let (_cmd_backend, cmd_worker, event_worker, _event_backend) = pipes();
    let registry = ModRegistry::builtin();

    let code = run_worker("WorkerTestError", "alas", cmd_worker, event_worker, &registry).await;
    assert_eq!(code, EXIT_ERROR);
}

#[tokio::test]
async fn kill_command_unwinds_infinite_mod() {
    let (mut cmd_backend, cmd_worker, event_worker, _event_backend) = pipes();
    let registry = ModRegistry::builtin();

    let worker = tokio::spawn(async move {
        run_worker("WorkerTestInfinite", "alas", cmd_worker, event_worker, &registry).await
    });

    write_frame(&mut cmd_backend, &CommandEvent::new(Command::Killing))
        .await
        .expect("command write failed");

    let code = timeout(Duration::from_secs(2), worker)
        .await
        .expect("kill did not unwind the worker")
        .expect("task panicked");
    assert_eq!(code, EXIT_KILLED);
}

#[tokio::test]
async fn scheduler_stop_exits_zero() {
    let (mut cmd_backend, cmd_worker, event_worker, _event_backend) = pipes();
    let registry = ModRegistry::builtin();

    let worker = tokio::spawn(async move {
        run_worker("WorkerTestScheduler", "alas", cmd_worker, event_worker, &registry).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    write_frame(&mut cmd_backend, &CommandEvent::new(Command::SchedulerStopping))
        .await
        .expect("command write failed");

    let code = timeout(Duration::from_secs(2), worker)
        .await
        .expect("scheduler stop did not end the worker")
        .expect("task panicked");
    assert_eq!(code, EXIT_OK);
}

#[tokio::test]
async fn custom_registry_entry_is_dispatched() {
    let (_cmd_backend, cmd_worker, event_worker, mut event_backend) = pipes();

    let mut registry = ModRegistry::new();
    registry.register("Custom", |ctx| {
        Box::pin(async move {
            ctx.bridge.send_log(format!("hello from {}", ctx.config)).await.done().await;
            Ok(())
        })
    });

    let worker = tokio::spawn(async move {
        run_worker("Custom", "cfg-a", cmd_worker, event_worker, &registry).await
    });

    // init
    let _: ConfigEvent = read_frame(&mut event_backend).await.expect("init event");
    let log: ConfigEvent = timeout(Duration::from_secs(2), read_frame(&mut event_backend))
        .await
        .expect("missing log")
        .expect("pipe closed");
    assert_eq!(log.value, serde_json::json!("hello from cfg-a"));

    let code = timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker hung")
        .expect("task panicked");
    assert_eq!(code, EXIT_OK);
}
