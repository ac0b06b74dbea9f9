// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker manager: owns every worker child and its pipe.
//!
//! One reader task per worker pipe forwards framed events into a single
//! channel consumed by the manager's I/O task; a per-spawn epoch tag drops
//! stale messages from earlier generations of the same config. All status
//! mutations happen under the state lock; process and pipe work happens
//! outside it.

mod spawn;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use spawn::{
    ChildProcess, ProcessSpawner, SpawnError, SpawnedWorker, WorkerProcess, WorkerSpawner,
};

use gantry_core::{epoch_ms, CommandEvent, ConfigEvent, WorkerStatus, TOPIC_WORKER_STATE};
use gantry_wire::write_frame;
use parking_lot::Mutex;
use serde::Serialize;
use spawn::{graceful_kill, DISCONNECT_JOIN};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Depth of the per-worker command queue. Commands are rare; this never
/// fills in practice and sends stay non-blocking under the state lock.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Depth of the fan-in channel from reader tasks to the I/O task. Bounded so
/// a stalled backend applies backpressure to pipe readers instead of buffering
/// without limit.
const PIPE_QUEUE_DEPTH: usize = 1024;

/// Errors from worker lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no such worker: \"{0}\"")]
    NoSuchWorker(String),

    #[error("worker is already running: \"{config}\", status={status}")]
    AlreadyRunning { config: String, status: WorkerStatus },

    #[error("worker not running: \"{config}\", status={status}")]
    NotRunning { config: String, status: WorkerStatus },

    #[error("worker is already stopping: \"{config}\", status={status}")]
    AlreadyStopping { config: String, status: WorkerStatus },

    #[error("worker is already killing: \"{config}\", status={status}")]
    AlreadyKilling { config: String, status: WorkerStatus },

    #[error("worker manager is closed")]
    Closed,

    #[error("failed to spawn worker \"{config}\": {reason}")]
    Spawn { config: String, reason: String },
}

/// Where the manager reports worker events and status transitions.
///
/// The default implementations drop everything; the backend installs a sink
/// that routes into the event bus.
pub trait EventSink: Send + Sync {
    /// A non-`WorkerState` event arrived from a worker. `event.config` has
    /// already been rewritten to the worker's own config.
    fn on_config_event(&self, event: ConfigEvent) {
        let _ = event;
    }

    /// A worker's status changed.
    fn on_worker_status(&self, config: &str, status: WorkerStatus) {
        let _ = (config, status);
    }
}

/// Sink that drops everything.
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Status snapshot for one worker, as reported by `get_state_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStateInfo {
    /// Mod this worker runs
    #[serde(rename = "mod")]
    pub mod_name: String,
    pub status: WorkerStatus,
    /// Last status-change timestamp, epoch milliseconds
    pub update: u64,
}

/// Per-config worker slot.
struct WorkerState {
    mod_name: String,
    config: String,
    status: WorkerStatus,
    update: u64,
    /// Spawn generation; pipe messages from older generations are stale
    epoch: u64,
    process: Option<Box<dyn WorkerProcess>>,
    conn: Option<mpsc::Sender<CommandEvent>>,
}

impl WorkerState {
    fn new(mod_name: &str, config: &str) -> Self {
        Self {
            mod_name: mod_name.to_string(),
            config: config.to_string(),
            status: WorkerStatus::Idle,
            update: epoch_ms(),
            epoch: 0,
            process: None,
            conn: None,
        }
    }

    fn set_status(&mut self, status: WorkerStatus) {
        self.status = status;
        self.update = epoch_ms();
    }
}

enum PipeMsg {
    Event { config: String, epoch: u64, event: ConfigEvent },
    Disconnected { config: String, epoch: u64 },
    Close,
}

struct Inner {
    state: Mutex<HashMap<String, WorkerState>>,
    spawner: Box<dyn WorkerSpawner>,
    sink: Box<dyn EventSink>,
    pipe_tx: mpsc::Sender<PipeMsg>,
    next_epoch: AtomicU64,
    closed: AtomicBool,
}

/// Owns all worker children and their pipes. One per backend.
pub struct WorkerManager {
    inner: Arc<Inner>,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerManager {
    /// Create the manager and start its I/O task.
    pub fn new(spawner: Box<dyn WorkerSpawner>, sink: Box<dyn EventSink>) -> Self {
        let (pipe_tx, pipe_rx) = mpsc::channel(PIPE_QUEUE_DEPTH);
        let inner = Arc::new(Inner {
            state: Mutex::new(HashMap::new()),
            spawner,
            sink,
            pipe_tx,
            next_epoch: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let io_task = tokio::spawn(io_loop(Arc::clone(&inner), pipe_rx));
        Self { inner, io_task: Mutex::new(Some(io_task)) }
    }

    /// Request to start a worker. Does not validate that `mod_name` exists;
    /// an unknown mod fails inside the worker and surfaces as `error`.
    pub async fn worker_start(&self, mod_name: &str, config: &str) -> Result<(), ManagerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ManagerError::Closed);
        }

        let epoch = {
            let mut state = self.inner.state.lock();
            let slot = state
                .entry(config.to_string())
                .or_insert_with(|| WorkerState::new(mod_name, config));
            if !slot.status.is_stopped() {
                return Err(ManagerError::AlreadyRunning {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            // Mark immediately so concurrent starts are rejected
            let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst);
            slot.mod_name = mod_name.to_string();
            slot.epoch = epoch;
            slot.set_status(WorkerStatus::Starting);
            epoch
        };
        self.inner.sink.on_worker_status(config, WorkerStatus::Starting);

        tracing::info!(config, mod_name, "starting worker");
        // Spawn without the lock
        let spawned = match self.inner.spawner.spawn(mod_name, config).await {
            Ok(spawned) => spawned,
            Err(e) => {
                // Leave no residue behind a failed spawn
                self.inner.state.lock().remove(config);
                self.inner.sink.on_worker_status(config, WorkerStatus::Idle);
                return Err(ManagerError::Spawn {
                    config: config.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let (conn_tx, conn_rx) = mpsc::channel::<CommandEvent>(COMMAND_QUEUE_DEPTH);

        let mut leftover = None;
        {
            let mut state = self.inner.state.lock();
            match state.get_mut(config) {
                Some(slot) if slot.epoch == epoch => {
                    slot.process = Some(spawned.process);
                    slot.conn = Some(conn_tx);
                    slot.set_status(WorkerStatus::Running);
                }
                // Force-killed (and removed) while we were spawning
                _ => leftover = Some(spawned.process),
            }
        }
        if let Some(mut process) = leftover {
            tracing::warn!(config, "worker was killed during startup, reaping process");
            graceful_kill(process.as_mut()).await;
            return Ok(());
        }

        // Pipe tasks start only after the slot holds the process handle, so
        // a disconnect can never be observed for a half-attached worker
        start_pipe_tasks(&self.inner, config, epoch, conn_rx, spawned.reader, spawned.writer);
        self.inner.sink.on_worker_status(config, WorkerStatus::Running);

        Ok(())
    }

    /// Ask a worker's scheduler loop to stop after its current task.
    pub fn worker_scheduler_stop(&self, config: &str) -> Result<(), ManagerError> {
        let conn = {
            let mut state = self.inner.state.lock();
            let slot = state
                .get_mut(config)
                .ok_or_else(|| ManagerError::NoSuchWorker(config.to_string()))?;
            if slot.status.is_stopped() {
                return Err(ManagerError::NotRunning {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            if slot.status.is_stopping() {
                return Err(ManagerError::AlreadyStopping {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            slot.set_status(WorkerStatus::SchedulerStopping);
            slot.conn.clone()
        };
        self.inner.sink.on_worker_status(config, WorkerStatus::SchedulerStopping);

        tracing::info!(config, "requesting scheduler stop");
        send_command(config, conn, gantry_core::Command::SchedulerStopping);
        Ok(())
    }

    /// Ask a worker to stop and clean up as soon as possible.
    pub fn worker_kill(&self, config: &str) -> Result<(), ManagerError> {
        let conn = {
            let mut state = self.inner.state.lock();
            let slot = state
                .get_mut(config)
                .ok_or_else(|| ManagerError::NoSuchWorker(config.to_string()))?;
            if slot.status.is_stopped() {
                return Err(ManagerError::NotRunning {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            if slot.status.is_killing() {
                return Err(ManagerError::AlreadyKilling {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            slot.set_status(WorkerStatus::Killing);
            slot.conn.clone()
        };
        self.inner.sink.on_worker_status(config, WorkerStatus::Killing);

        tracing::info!(config, "requesting worker kill");
        send_command(config, conn, gantry_core::Command::Killing);
        Ok(())
    }

    /// Terminate a worker process OS-level and clear its slot.
    pub async fn worker_force_kill(&self, config: &str) -> Result<(), ManagerError> {
        let process = {
            let mut state = self.inner.state.lock();
            let slot = state
                .get_mut(config)
                .ok_or_else(|| ManagerError::NoSuchWorker(config.to_string()))?;
            if slot.status.is_stopped() {
                return Err(ManagerError::NotRunning {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            if slot.status == WorkerStatus::ForceKilling {
                return Err(ManagerError::AlreadyKilling {
                    config: config.to_string(),
                    status: slot.status,
                });
            }
            slot.set_status(WorkerStatus::ForceKilling);
            slot.conn = None;
            slot.process.take()
        };
        self.inner.sink.on_worker_status(config, WorkerStatus::ForceKilling);

        if let Some(mut process) = process {
            graceful_kill(process.as_mut()).await;
        }

        {
            let mut state = self.inner.state.lock();
            if let Some(slot) = state.get_mut(config) {
                slot.set_status(WorkerStatus::Idle);
            }
            state.remove(config);
        }
        self.inner.sink.on_worker_status(config, WorkerStatus::Idle);
        Ok(())
    }

    /// Snapshot of every worker's status.
    pub fn get_state_info(&self) -> BTreeMap<String, WorkerStateInfo> {
        let state = self.inner.state.lock();
        state
            .values()
            .map(|slot| {
                (
                    slot.config.clone(),
                    WorkerStateInfo {
                        mod_name: slot.mod_name.clone(),
                        status: slot.status,
                        update: slot.update,
                    },
                )
            })
            .collect()
    }

    /// Current status of one worker; `idle` when there is no entry.
    pub fn status(&self, config: &str) -> WorkerStatus {
        self.inner
            .state
            .lock()
            .get(config)
            .map(|slot| slot.status)
            .unwrap_or(WorkerStatus::Idle)
    }

    /// Whether a config has a state entry at all. An `idle` worker has none.
    pub fn has_entry(&self, config: &str) -> bool {
        self.inner.state.lock().contains_key(config)
    }

    /// Terminate every worker and stop the I/O task.
    pub async fn close(&self) {
        tracing::info!("worker manager closing");
        self.inner.closed.store(true, Ordering::SeqCst);

        loop {
            let drained: Vec<WorkerState> = {
                let mut state = self.inner.state.lock();
                if state.is_empty() {
                    break;
                }
                state.drain().map(|(_, slot)| slot).collect()
            };

            for mut slot in drained {
                self.inner.sink.on_worker_status(&slot.config, WorkerStatus::Killing);
                slot.conn = None;
                if let Some(mut process) = slot.process.take() {
                    graceful_kill(process.as_mut()).await;
                }
                self.inner.sink.on_worker_status(&slot.config, WorkerStatus::Idle);
            }
            // A worker may have started while we were killing the last batch
        }

        let _ = self.inner.pipe_tx.send(PipeMsg::Close).await;
        let task = self.io_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("worker manager closed");
    }
}

/// Send one command over a worker's command queue. Failures are logged, not
/// fatal; a broken pipe surfaces as a disconnect on the read side.
fn send_command(config: &str, conn: Option<mpsc::Sender<CommandEvent>>, command: gantry_core::Command) {
    let Some(conn) = conn else {
        tracing::warn!(config, "failed to send command: pipe not connected");
        return;
    };
    if let Err(e) = conn.try_send(CommandEvent::new(command)) {
        tracing::warn!(config, error = %e, "failed to send command");
    }
}

/// Start the per-worker pipe tasks: a writer draining the command queue and
/// a reader forwarding framed events to the I/O task.
fn start_pipe_tasks(
    inner: &Arc<Inner>,
    config: &str,
    epoch: u64,
    mut conn_rx: mpsc::Receiver<CommandEvent>,
    reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    writer: Box<dyn tokio::io::AsyncWrite + Send + Unpin>,
) {
    let writer_config = config.to_string();
    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(command) = conn_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &command).await {
                tracing::warn!(config = writer_config, error = %e, "command write failed");
                return;
            }
        }
    });

    let pipe_tx = inner.pipe_tx.clone();
    let reader_config = config.to_string();
    tokio::spawn(async move {
        let mut reader = reader;
        loop {
            match gantry_wire::read_frame::<_, ConfigEvent>(&mut reader).await {
                Ok(event) => {
                    let msg =
                        PipeMsg::Event { config: reader_config.clone(), epoch, event };
                    if pipe_tx.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(e) if e.is_closed() => {
                    let msg = PipeMsg::Disconnected { config: reader_config.clone(), epoch };
                    let _ = pipe_tx.send(msg).await;
                    return;
                }
                Err(e) => {
                    // One bad frame; keep the pipe
                    tracing::warn!(config = reader_config, error = %e, "failed to decode worker event");
                }
            }
        }
    });
}

/// The manager's I/O task: serializes all pipe-originated work.
async fn io_loop(inner: Arc<Inner>, mut pipe_rx: mpsc::Receiver<PipeMsg>) {
    while let Some(msg) = pipe_rx.recv().await {
        match msg {
            PipeMsg::Event { config, epoch, event } => {
                handle_config_event(&inner, &config, epoch, event);
            }
            PipeMsg::Disconnected { config, epoch } => {
                handle_disconnect(&inner, &config, epoch).await;
            }
            PipeMsg::Close => break,
        }
    }
}

/// Rewrite the event's config to the worker it actually came from, apply
/// `WorkerState` announcements, and forward the rest to the sink.
fn handle_config_event(inner: &Arc<Inner>, config: &str, epoch: u64, mut event: ConfigEvent) {
    // Trust boundary: a worker can only ever speak for itself
    event.config = config.to_string();

    if event.topic == TOPIC_WORKER_STATE {
        let Ok(announced) = serde_json::from_value::<WorkerStatus>(event.value.clone()) else {
            tracing::warn!(config, value = %event.value, "invalid WorkerState announcement");
            return;
        };
        if !announced.is_self_reportable() {
            return;
        }
        let changed = {
            let mut state = inner.state.lock();
            match state.get_mut(config) {
                Some(slot) if slot.epoch == epoch && slot.status.is_self_reportable() => {
                    if slot.status != announced {
                        slot.set_status(announced);
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };
        if changed {
            inner.sink.on_worker_status(config, announced);
        }
        return;
    }

    // Drop events from a previous spawn generation
    let stale = {
        let state = inner.state.lock();
        !matches!(state.get(config), Some(slot) if slot.epoch == epoch)
    };
    if stale {
        return;
    }

    inner.sink.on_config_event(event);
}

/// Cleanup when a worker pipe closes unexpectedly.
async fn handle_disconnect(inner: &Arc<Inner>, config: &str, epoch: u64) {
    let (status_before, process) = {
        let mut state = inner.state.lock();
        let Some(slot) = state.get_mut(config) else {
            return;
        };
        if slot.epoch != epoch {
            return;
        }
        let status_before = slot.status;
        slot.set_status(WorkerStatus::ForceKilling);
        slot.conn = None;
        (status_before, slot.process.take())
    };
    inner.sink.on_worker_status(config, WorkerStatus::ForceKilling);

    // After a pipe break the process should be exiting on its own; give it a
    // moment, then escalate
    let exit_code = match process {
        Some(mut process) => {
            let code = match process.join(DISCONNECT_JOIN).await {
                Some(code) => Some(code),
                None => graceful_kill(process.as_mut()).await,
            };
            code
        }
        None => None,
    };

    let final_status = {
        let mut state = inner.state.lock();
        let Some(slot) = state.get_mut(config) else {
            return;
        };
        if slot.epoch != epoch {
            return;
        }
        if exit_code == Some(0) || status_before.is_killing() {
            // Clean exit, or a death we asked for
            slot.set_status(WorkerStatus::Idle);
            state.remove(config);
            WorkerStatus::Idle
        } else {
            slot.set_status(WorkerStatus::Error);
            WorkerStatus::Error
        }
    };
    tracing::info!(config, ?exit_code, status = %final_status, "worker disconnected");
    inner.sink.on_worker_status(config, final_status);
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
