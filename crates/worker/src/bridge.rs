// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The in-worker bridge to the backend pipe.
//!
//! One send task drains a bounded queue and writes framed [`ConfigEvent`]s in
//! queue order; one command task reads framed [`CommandEvent`]s and flips the
//! corresponding in-process signal. The worker's mod code runs on the main
//! task and talks to both only through the queue and the tokens.

use gantry_core::{Command, CommandEvent, ConfigEvent, WorkerStatus};
use gantry_wire::{encode, write_message, ProtocolError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outbound queue depth. `send` blocks once this many events are pending,
/// which is the backpressure contract: an enqueued event is guaranteed to be
/// written unless the bridge is closing.
const SEND_QUEUE_DEPTH: usize = 64;

struct SendJob {
    data: Vec<u8>,
    done: oneshot::Sender<()>,
}

/// Handle returned by [`Bridge::send`]; resolves once the event has been
/// written to the pipe, or immediately once the bridge is closing. Callers
/// that never await it leak nothing.
#[derive(Debug)]
pub struct SendTicket {
    rx: Option<oneshot::Receiver<()>>,
}

impl SendTicket {
    fn ready() -> Self {
        Self { rx: None }
    }

    /// Wait until the event hit the pipe or the bridge gave up on it.
    pub async fn done(self) {
        if let Some(rx) = self.rx {
            let _ = rx.await;
        }
    }
}

/// The worker's connection to the backend.
pub struct Bridge {
    send_tx: mpsc::Sender<SendJob>,
    closing: CancellationToken,
    scheduler_stopping: CancellationToken,
    kill: CancellationToken,
    test_wait: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Connect the bridge over the worker's pipe halves, start the send and
    /// command tasks, and announce `running` so the manager can move the
    /// worker out of `starting`.
    pub async fn connect<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let bridge = Arc::new(Self {
            send_tx,
            closing: CancellationToken::new(),
            scheduler_stopping: CancellationToken::new(),
            kill: CancellationToken::new(),
            test_wait: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let send_task = tokio::spawn(send_loop(writer, send_rx, bridge.closing.clone()));
        let command_task = tokio::spawn(command_loop(reader, Arc::clone(&bridge)));
        *bridge.tasks.lock() = vec![send_task, command_task];

        bridge.send_worker_state(WorkerStatus::Running).await.done().await;
        bridge
    }

    /// Enqueue an event for ordered delivery. Blocks while the queue is full.
    pub async fn send(&self, event: ConfigEvent) -> SendTicket {
        if self.closing.is_cancelled() {
            return SendTicket::ready();
        }
        let data = match encode(&event) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(topic = event.topic, error = %e, "failed to encode event");
                return SendTicket::ready();
            }
        };
        let (done, rx) = oneshot::channel();
        match self.send_tx.send(SendJob { data, done }).await {
            Ok(()) => SendTicket { rx: Some(rx) },
            // Send task is gone; behave as fire-and-forget
            Err(_) => SendTicket::ready(),
        }
    }

    /// Send a log record.
    pub async fn send_log(&self, value: impl Into<Value>) -> SendTicket {
        self.send(ConfigEvent::log(value)).await
    }

    /// Announce a worker status (`running` / `scheduler-waiting`).
    pub async fn send_worker_state(&self, status: WorkerStatus) -> SendTicket {
        self.send(ConfigEvent::worker_state(status)).await
    }

    /// Token cancelled when the backend requested a scheduler stop. Mod code
    /// polls this between tasks.
    pub fn scheduler_stopping(&self) -> &CancellationToken {
        &self.scheduler_stopping
    }

    /// Token cancelled when the backend requested a kill. The worker runner
    /// races the mod body against this.
    pub fn kill(&self) -> &CancellationToken {
        &self.kill
    }

    /// Test-harness pacing notifier, pulsed by the `test-continue` command.
    pub fn test_wait(&self) -> &Notify {
        &self.test_wait
    }

    /// Whether the bridge has started shutting down.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Shut down: resolve every pending ticket and join both tasks.
    pub async fn close(&self) {
        self.closing.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Drain the send queue in order, one framed message per event. On a write
/// failure the bridge flips to closing and the remaining queue is resolved
/// without writing, so no caller is left waiting.
async fn send_loop<W>(
    mut writer: W,
    mut send_rx: mpsc::Receiver<SendJob>,
    closing: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let job = tokio::select! {
            biased;
            job = send_rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
            _ = closing.cancelled() => break,
        };

        if closing.is_cancelled() {
            let _ = job.done.send(());
            continue;
        }
        // Abandon an in-flight write when the bridge closes under it, so a
        // full pipe cannot wedge shutdown.
        let result = tokio::select! {
            result = write_message(&mut writer, &job.data) => result,
            _ = closing.cancelled() => {
                let _ = job.done.send(());
                break;
            }
        };
        if let Err(e) = result {
            log_send_failure(&e);
            closing.cancel();
        }
        let _ = job.done.send(());
    }

    // Closing: resolve whatever is still queued
    while let Ok(job) = send_rx.try_recv() {
        let _ = job.done.send(());
    }
}

fn log_send_failure(e: &ProtocolError) {
    if e.is_closed() {
        tracing::error!("failed to send event: pipe broken");
    } else {
        tracing::error!(error = %e, "failed to send event");
    }
}

/// Read framed commands until the pipe closes or the bridge shuts down.
async fn command_loop<R>(mut reader: R, bridge: Arc<Bridge>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let result = tokio::select! {
            result = gantry_wire::read_frame::<_, CommandEvent>(&mut reader) => result,
            _ = bridge.closing.cancelled() => return,
        };
        match result {
            Ok(event) => handle_command(&bridge, event),
            Err(e) if e.is_closed() => {
                // The backend is gone; the worker is orphaned and should
                // wind down rather than run headless forever.
                tracing::error!("failed to recv command: pipe broken");
                bridge.closing.cancel();
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode command");
                continue;
            }
        }
    }
}

fn handle_command(bridge: &Bridge, event: CommandEvent) {
    match event.command {
        Command::SchedulerStopping => bridge.scheduler_stopping.cancel(),
        Command::Killing | Command::ForceKilling => bridge.kill.cancel(),
        Command::TestContinue => bridge.test_wait.notify_waiters(),
        Command::Unknown => {
            tracing::warn!("ignoring unknown command from backend");
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
