// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mod registry: maps a mod name to the async entry that drives one
//! automation scheduler inside a worker process.
//!
//! The registry is injected into [`crate::run_worker`] so embedders and
//! tests can register their own entries. The built-in set consists of the
//! small exercise mods used by the lifecycle tests and end-to-end checks.

use crate::bridge::Bridge;
use futures_util::future::BoxFuture;
use gantry_core::WorkerStatus;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error returned by a mod body.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ModError(pub String);

/// Future returned by a mod entry.
pub type ModFuture = BoxFuture<'static, Result<(), ModError>>;

/// Stored mod entry.
pub type ModFn = Arc<dyn Fn(ModCtx) -> ModFuture + Send + Sync>;

/// Everything a mod entry gets to work with.
#[derive(Clone)]
pub struct ModCtx {
    /// Config this worker runs for
    pub config: String,
    /// The worker's backend bridge
    pub bridge: Arc<Bridge>,
}

/// Name → entry function map.
#[derive(Clone, Default)]
pub struct ModRegistry {
    mods: HashMap<String, ModFn>,
}

impl ModRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the built-in exercise mods.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("WorkerTestInfinite", |ctx| Box::pin(worker_test_infinite(ctx)));
        registry.register("WorkerTestRun3", |ctx| Box::pin(worker_test_run3(ctx)));
        registry.register("WorkerTestError", |ctx| Box::pin(worker_test_error(ctx)));
        registry.register("WorkerTestScheduler", |ctx| Box::pin(worker_test_scheduler(ctx)));
        registry.register("WorkerTestSendEvents", |ctx| Box::pin(worker_test_send_events(ctx)));
        registry
    }

    /// Register an entry under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, entry: F)
    where
        F: Fn(ModCtx) -> ModFuture + Send + Sync + 'static,
    {
        self.mods.insert(name.into(), Arc::new(entry));
    }

    /// Look up an entry.
    pub fn get(&self, name: &str) -> Option<ModFn> {
        self.mods.get(name).cloned()
    }

    /// Registered mod names, for diagnostics.
    pub fn names(&self) -> Vec<&str> {
        self.mods.keys().map(String::as_str).collect()
    }
}

/// Wait one pacing tick: a `test-continue` pulse or 50ms, whichever first.
async fn pace(bridge: &Bridge) {
    let notified = bridge.test_wait().notified();
    let _ = tokio::time::timeout(Duration::from_millis(50), notified).await;
}

/// Emits a numbered log line forever.
async fn worker_test_infinite(ctx: ModCtx) -> Result<(), ModError> {
    let mut n: u64 = 0;
    loop {
        ctx.bridge.send_log(n.to_string()).await;
        n += 1;
        pace(&ctx.bridge).await;
    }
}

/// Emits three numbered log lines, then exits cleanly.
async fn worker_test_run3(ctx: ModCtx) -> Result<(), ModError> {
    for n in 0..3 {
        ctx.bridge.send_log(n.to_string()).await;
        pace(&ctx.bridge).await;
    }
    Ok(())
}

/// Emits one log line, then fails.
async fn worker_test_error(ctx: ModCtx) -> Result<(), ModError> {
    ctx.bridge.send_log("1").await;
    pace(&ctx.bridge).await;
    Err(ModError("worker test error".into()))
}

/// Simulates a scheduler: alternates `running` / `scheduler-waiting`
/// announcements and exits cleanly once a scheduler stop is requested.
async fn worker_test_scheduler(ctx: ModCtx) -> Result<(), ModError> {
    ctx.bridge.send_log("1").await;
    let mut n: u64 = 0;
    loop {
        if n % 3 == 2 {
            ctx.bridge.send_worker_state(WorkerStatus::SchedulerWaiting).await;
        } else {
            ctx.bridge.send_worker_state(WorkerStatus::Running).await;
        }
        n += 1;

        let stopping = tokio::time::timeout(
            Duration::from_millis(50),
            ctx.bridge.scheduler_stopping().cancelled(),
        )
        .await
        .is_ok();
        pace(&ctx.bridge).await;
        if stopping {
            return Ok(());
        }
    }
}

/// Emits a spread of event shapes, then loops until a scheduler stop.
async fn worker_test_send_events(ctx: ModCtx) -> Result<(), ModError> {
    let bridge = &ctx.bridge;

    bridge.send_log("worker started").await;
    pace(bridge).await;

    bridge.send(gantry_core::ConfigEvent::new("CustomEvent", "test_value_1")).await;
    pace(bridge).await;

    bridge.send(gantry_core::ConfigEvent::new("CustomEvent", "test_value_2")).await;
    pace(bridge).await;

    bridge
        .send(gantry_core::ConfigEvent::with_key(
            "DataUpdate",
            ["task", "group", "arg"],
            json!({"data": 123}),
        ))
        .await;
    pace(bridge).await;

    bridge.send_worker_state(WorkerStatus::SchedulerWaiting).await;
    pace(bridge).await;

    bridge.send_worker_state(WorkerStatus::Running).await;
    pace(bridge).await;

    while !bridge.scheduler_stopping().is_cancelled() {
        bridge.send_log("still running").await;
        pace(bridge).await;
    }
    Ok(())
}

#[cfg(test)]
#[path = "mods_tests.rs"]
mod tests;
