// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level supervisor: owns exactly one backend child.
//!
//! Its whole surface is the OS (signals in, exit codes out) plus the
//! framed control pipe on the child's stdin/stdout. Crashes restart the
//! backend under a sliding-window budget; operator interrupts escalate from
//! graceful stop to force kill.

use crate::config::SupervisorConfig;
use gantry_wire::{read_frame, write_frame, ControlMsg};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdout, Command};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// How the backend child is launched. Injectable so tests can supervise
/// shell stubs instead of the real binary.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BackendCommand {
    /// The production command: this executable's `backend` role, with the
    /// operator's arguments forwarded verbatim.
    pub fn current_exe(forward_args: Vec<String>) -> Result<Self, std::io::Error> {
        let mut args = vec!["backend".to_string()];
        args.extend(forward_args);
        Ok(Self { program: std::env::current_exe()?, args })
    }
}

enum RecvEnd {
    /// Backend pipe closed (process exiting)
    PipeClosed { startup_success: bool },
    /// Operator interrupt or backend-requested stop
    Interrupted,
}

/// Supervises one backend process.
pub struct Supervisor {
    config: SupervisorConfig,
    command: BackendCommand,
    restart_times: Vec<Instant>,
    sigint_count: u32,
    restart_requested: bool,
}

impl Supervisor {
    pub fn new(command: BackendCommand, config: SupervisorConfig) -> Self {
        Self { config, command, restart_times: Vec::new(), sigint_count: 0, restart_requested: false }
    }

    /// Supervision loop. Returns the process exit code: 0 for an operator
    /// shutdown, nonzero for a startup failure or an exhausted restart
    /// budget.
    pub async fn run(mut self) -> i32 {
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(int), Ok(term)) => (int, term),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                return 1;
            }
        };

        tracing::info!(pid = std::process::id(), "supervisor running");

        loop {
            self.restart_requested = false;

            let mut child = match self.start_backend() {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start backend");
                    return 1;
                }
            };
            let Some(mut stdout) = child.stdout.take() else {
                tracing::error!("backend child has no stdout pipe");
                return 1;
            };

            match self.recv_loop(&mut stdout, &mut sigint, &mut sigterm).await {
                RecvEnd::Interrupted => {
                    return self.shutdown(child, &mut sigint, &mut sigterm).await;
                }
                RecvEnd::PipeClosed { startup_success } => {
                    wait_for_backend(&mut child).await;

                    if !startup_success {
                        tracing::error!("backend failed to start properly, not retrying");
                        return 1;
                    }
                    if self.restart_requested {
                        tracing::info!("restarting backend on request");
                        continue;
                    }
                    if !self.check_restart_limit() {
                        return 1;
                    }

                    tracing::info!(delay = ?self.config.restart_delay, "restarting backend");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.restart_delay) => {}
                        _ = sigint.recv() => {
                            tracing::info!("interrupted during restart wait, exiting");
                            return 0;
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("terminated during restart wait, exiting");
                            return 0;
                        }
                    }
                }
            }
        }
    }

    fn start_backend(&self) -> Result<Child, std::io::Error> {
        tracing::info!("starting backend process");
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(pid = child.id(), "backend running");
        Ok(child)
    }

    /// Listen on the backend pipe until it closes, a stop is requested, or
    /// the operator interrupts. The first frame (or surviving
    /// `startup_timeout` without one) marks startup as successful; a pipe
    /// that closes earlier is a startup failure.
    async fn recv_loop(
        &mut self,
        stdout: &mut ChildStdout,
        sigint: &mut Signal,
        sigterm: &mut Signal,
    ) -> RecvEnd {
        let mut startup_success = false;
        let startup_deadline = tokio::time::sleep(self.config.startup_timeout);
        tokio::pin!(startup_deadline);

        'frames: loop {
            // One read future per frame, kept alive across the startup
            // deadline so a partially-read frame is never abandoned
            let read = read_frame::<_, ControlMsg>(stdout);
            tokio::pin!(read);

            let result = loop {
                tokio::select! {
                    _ = &mut startup_deadline, if !startup_success => {
                        tracing::info!(
                            timeout = ?self.config.startup_timeout,
                            "backend survived startup window, startup successful"
                        );
                        startup_success = true;
                    }
                    result = &mut read => break result,
                    _ = sigint.recv() => return self.on_interrupt("SIGINT"),
                    _ = sigterm.recv() => return self.on_interrupt("SIGTERM"),
                }
            };

            match result {
                Ok(msg) => {
                    if !startup_success {
                        tracing::info!("backend emitted a message, startup successful");
                        startup_success = true;
                    }
                    match msg {
                        ControlMsg::Restart => {
                            tracing::info!("backend requested restart");
                            self.restart_requested = true;
                        }
                        ControlMsg::Stop => {
                            self.sigint_count += 1;
                            tracing::info!("backend requested stop, initiating graceful shutdown");
                            return RecvEnd::Interrupted;
                        }
                        ControlMsg::Unknown => {
                            tracing::warn!("unknown command from backend");
                        }
                    }
                }
                Err(e) if e.is_closed() => {
                    if startup_success {
                        tracing::info!("backend closed pipe connection");
                    } else {
                        tracing::warn!("backend closed pipe connection during startup");
                    }
                    return RecvEnd::PipeClosed { startup_success };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "bad frame from backend, dropping");
                    continue 'frames;
                }
            }
        }
    }

    fn on_interrupt(&mut self, sig: &str) -> RecvEnd {
        self.sigint_count += 1;
        tracing::info!(signal = sig, "received interrupt, initiating graceful shutdown");
        RecvEnd::Interrupted
    }

    /// Graceful-then-forced shutdown. A second interrupt while waiting
    /// escalates straight to force kill; further interrupts only log.
    async fn shutdown(
        &mut self,
        mut child: Child,
        sigint: &mut Signal,
        sigterm: &mut Signal,
    ) -> i32 {
        if let Some(mut stdin) = child.stdin.take() {
            // Failure here is non-fatal: the timeout below escalates
            if let Err(e) = write_frame(&mut stdin, &ControlMsg::Stop).await {
                tracing::error!(error = %e, "failed to send stop to backend");
            }
        }

        let deadline = tokio::time::sleep(self.config.graceful_shutdown_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                result = child.wait() => {
                    match result {
                        Ok(status) => tracing::info!(code = ?status.code(), "backend exited"),
                        Err(e) => tracing::warn!(error = %e, "error waiting for backend"),
                    }
                    return 0;
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        timeout = ?self.config.graceful_shutdown_timeout,
                        "backend did not shut down in time, force killing"
                    );
                    break;
                }
                _ = sigint.recv() => {
                    if self.escalate_interrupt() {
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    if self.escalate_interrupt() {
                        break;
                    }
                }
            }
        }

        let _ = child.start_kill();
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(_) => tracing::info!("backend force killed"),
            Err(_) => tracing::error!("failed to force kill backend"),
        }
        0
    }

    fn escalate_interrupt(&mut self) -> bool {
        self.sigint_count += 1;
        if self.sigint_count == 2 {
            tracing::info!("second interrupt, force killing backend");
            true
        } else {
            tracing::info!(count = self.sigint_count, "already shutting down, please wait");
            false
        }
    }

    /// Whether another crash restart fits the sliding window. Records the
    /// attempt when it does. Backend-requested restarts never pass through
    /// here; they are always honored and never consume the budget.
    fn check_restart_limit(&mut self) -> bool {
        let now = Instant::now();
        let window = self.config.restart_window;
        self.restart_times.retain(|t| now.duration_since(*t) < window);

        if self.restart_times.len() >= self.config.max_restart_attempts {
            tracing::error!(
                attempts = self.config.max_restart_attempts,
                window = ?window,
                "backend crashed too many times, giving up"
            );
            return false;
        }
        self.restart_times.push(now);
        true
    }
}

async fn wait_for_backend(child: &mut Child) -> i32 {
    match child.wait().await {
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            tracing::info!(code, "backend exited");
            code
        }
        Err(e) => {
            tracing::warn!(error = %e, "error waiting for backend");
            -1
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
