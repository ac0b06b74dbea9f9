// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend role wiring: manager + event bus + log drainer + WebSocket
//! surface + the supervisor pipe on stdin/stdout.

use crate::bus::{LogCacheRegistry, MsgBus};
use crate::config::BackendConfig;
use crate::manager::{EventSink, ProcessSpawner, WorkerManager};
use crate::ws::{self, WsCtx};
use gantry_core::{ConfigEvent, WorkerStatus, TOPIC_LOG};
use gantry_wire::{read_frame, write_frame, ControlMsg};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to bind WebSocket listener: {0}")]
    Bind(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shutdown/restart requests flowing into the backend's main loop, from the
/// supervisor pipe or from the browser surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Stop,
    Restart,
}

/// Routes manager events into the bus and the per-config log caches.
///
/// Log events take the direct producer path into their cache (this is
/// called from the manager's I/O task); everything else goes through the
/// bus channels with drop-on-full semantics.
pub struct BusSink {
    bus: MsgBus,
    logs: Arc<LogCacheRegistry>,
}

impl BusSink {
    pub fn new(bus: MsgBus, logs: Arc<LogCacheRegistry>) -> Self {
        Self { bus, logs }
    }
}

impl EventSink for BusSink {
    fn on_config_event(&self, event: ConfigEvent) {
        if event.topic == TOPIC_LOG {
            self.logs.get_or_create(&event.config).on_event(&event);
        } else if !self.bus.send_config(event) {
            tracing::warn!("config msgbus full, dropping event");
        }
    }

    fn on_worker_status(&self, config: &str, status: WorkerStatus) {
        if !self.bus.send_global(crate::topic::WORKER_TOPIC, json!([config, status])) {
            tracing::warn!(config, %status, "global msgbus full, dropping status broadcast");
        }
    }
}

/// Run the backend until the supervisor (or the browser surface) asks it to
/// stop. Returns the process exit code.
pub async fn run(config: BackendConfig) -> Result<i32, BackendError> {
    // The supervisor is the sole controller of graceful shutdown; terminal
    // interrupts reach the whole process group, so the backend swallows them
    ignore_interrupts();

    let (bus, bus_driver) = MsgBus::new();
    let (logs, log_drainer) = LogCacheRegistry::new();
    tokio::spawn(bus_driver.run());
    tokio::spawn(log_drainer.run());

    let sink = BusSink::new(bus.clone(), Arc::clone(&logs));
    let spawner = ProcessSpawner::current_exe()?;
    let manager = Arc::new(WorkerManager::new(Box::new(spawner), Box::new(sink)));

    let (control_tx, mut control_rx) = mpsc::channel::<ControlRequest>(4);

    if let Some(addr) = config.listen {
        let listener = TcpListener::bind(addr).await.map_err(BackendError::Bind)?;
        tracing::info!(%addr, "WebSocket surface listening");
        let ctx = Arc::new(WsCtx {
            manager: Arc::clone(&manager),
            bus: bus.clone(),
            logs: Arc::clone(&logs),
            control_tx: control_tx.clone(),
        });
        tokio::spawn(ws::serve(listener, ctx));
    }

    tokio::spawn(supervisor_pipe_loop(control_tx));

    tracing::info!(state_dir = %config.state_dir.display(), "backend running");

    let request = control_rx.recv().await.unwrap_or(ControlRequest::Stop);
    match request {
        ControlRequest::Stop => {
            tracing::info!("stop requested, shutting down");
        }
        ControlRequest::Restart => {
            tracing::info!("restart requested, asking supervisor");
            let mut stdout = tokio::io::stdout();
            if let Err(e) = write_frame(&mut stdout, &ControlMsg::Restart).await {
                tracing::error!(error = %e, "failed to send restart to supervisor");
            }
        }
    }

    manager.close().await;
    Ok(0)
}

/// Read control frames from the supervisor on stdin. A closed pipe means
/// the supervisor is gone; an orphaned backend shuts down rather than run
/// unsupervised.
async fn supervisor_pipe_loop(control_tx: mpsc::Sender<ControlRequest>) {
    let mut stdin = tokio::io::stdin();
    loop {
        match read_frame::<_, ControlMsg>(&mut stdin).await {
            Ok(ControlMsg::Stop) => {
                tracing::info!("supervisor requested stop");
                let _ = control_tx.send(ControlRequest::Stop).await;
                return;
            }
            Ok(ControlMsg::Restart) | Ok(ControlMsg::Unknown) => {
                tracing::warn!("unexpected command on supervisor pipe, dropping");
            }
            Err(e) if e.is_closed() => {
                tracing::warn!("supervisor pipe closed, shutting down");
                let _ = control_tx.send(ControlRequest::Stop).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "bad frame on supervisor pipe, dropping");
            }
        }
    }
}

fn ignore_interrupts() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
        Ok(mut sigint) => {
            tokio::spawn(async move {
                loop {
                    sigint.recv().await;
                    tracing::debug!("ignoring SIGINT; the supervisor controls shutdown");
                }
            });
        }
        Err(e) => tracing::warn!(error = %e, "failed to mask SIGINT"),
    }
}
