// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process stand-ins for worker children and the event sink.
//!
//! [`TaskSpawner`] runs a real bridge plus a real mod as a tokio task over
//! duplex pipes, so manager lifecycle tests exercise the actual protocol
//! without forking the binary.

use super::spawn::{SpawnError, SpawnedWorker, WorkerProcess, WorkerSpawner};
use super::EventSink;
use async_trait::async_trait;
use gantry_core::{ConfigEvent, WorkerStatus};
use gantry_worker::{run_mod_on_bridge, Bridge, ModRegistry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit code reported when a task worker is terminated (SIGTERM stand-in).
pub const EXIT_TERMINATED: i32 = -15;
/// Exit code reported when a task worker is hard-killed (SIGKILL stand-in).
pub const EXIT_HARD_KILLED: i32 = -9;

/// Spawner that runs workers as in-process tasks over duplex pipes.
pub struct TaskSpawner {
    registry: ModRegistry,
}

impl TaskSpawner {
    pub fn new(registry: ModRegistry) -> Self {
        Self { registry }
    }

    /// Spawner with the built-in exercise mods.
    pub fn builtin() -> Self {
        Self::new(ModRegistry::builtin())
    }
}

#[async_trait]
impl WorkerSpawner for TaskSpawner {
    async fn spawn(&self, mod_name: &str, config: &str) -> Result<SpawnedWorker, SpawnError> {
        let (cmd_backend, cmd_worker) = tokio::io::duplex(64 * 1024);
        let (event_worker, event_backend) = tokio::io::duplex(64 * 1024);

        let term = CancellationToken::new();
        let term_inner = term.clone();
        let registry = self.registry.clone();
        let mod_name = mod_name.to_string();
        let config = config.to_string();

        let handle = tokio::spawn(async move {
            let bridge = Bridge::connect(cmd_worker, event_worker).await;
            let code = tokio::select! {
                _ = term_inner.cancelled() => EXIT_TERMINATED,
                code = run_mod_on_bridge(&bridge, &mod_name, &config, &registry) => code,
            };
            // Closing the bridge drops the pipe halves, which is what lets
            // the manager observe EOF like a real process exit
            bridge.close().await;
            code
        });

        Ok(SpawnedWorker {
            process: Box::new(TaskProcess { handle, term, code: None }),
            reader: Box::new(event_backend),
            writer: Box::new(cmd_backend),
        })
    }
}

/// Process handle over a worker task.
pub struct TaskProcess {
    handle: JoinHandle<i32>,
    term: CancellationToken,
    code: Option<i32>,
}

#[async_trait]
impl WorkerProcess for TaskProcess {
    fn is_alive(&mut self) -> bool {
        self.code.is_none() && !self.handle.is_finished()
    }

    fn terminate(&mut self) {
        self.term.cancel();
    }

    fn kill(&mut self) {
        self.handle.abort();
    }

    async fn join(&mut self, timeout: Duration) -> Option<i32> {
        if let Some(code) = self.code {
            return Some(code);
        }
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(code)) => {
                self.code = Some(code);
                Some(code)
            }
            Ok(Err(_)) => {
                self.code = Some(EXIT_HARD_KILLED);
                self.code
            }
            Err(_) => None,
        }
    }
}

/// Sink that records everything it sees.
#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Arc<RecordingInner>,
}

#[derive(Default)]
struct RecordingInner {
    events: Mutex<Vec<ConfigEvent>>,
    statuses: Mutex<Vec<(String, WorkerStatus)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConfigEvent> {
        self.inner.events.lock().clone()
    }

    pub fn statuses(&self) -> Vec<(String, WorkerStatus)> {
        self.inner.statuses.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_config_event(&self, event: ConfigEvent) {
        self.inner.events.lock().push(event);
    }

    fn on_worker_status(&self, config: &str, status: WorkerStatus) {
        self.inner.statuses.lock().push((config.to_string(), status));
    }
}
