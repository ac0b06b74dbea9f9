// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker child process abstraction and the production spawner.
//!
//! The manager talks to children through [`WorkerSpawner`] and
//! [`WorkerProcess`] so lifecycle tests can run real bridges in-process
//! instead of forking the binary.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// Join budget for each stage of a graceful kill (terminate, then kill).
pub(crate) const KILL_JOIN: Duration = Duration::from_secs(1);

/// Brief join after a pipe disconnect before escalating; a worker whose pipe
/// broke should be exiting on its own.
pub(crate) const DISCONNECT_JOIN: Duration = Duration::from_millis(200);

/// Spawn errors.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn worker process: {0}")]
    Process(#[from] std::io::Error),

    #[error("worker process has no pipe handles")]
    MissingPipes,
}

/// Handle to a running worker child.
#[async_trait]
pub trait WorkerProcess: Send {
    /// Whether the child is still running.
    fn is_alive(&mut self) -> bool;

    /// Ask the child to exit (SIGTERM-equivalent).
    fn terminate(&mut self);

    /// Stop the child unconditionally (SIGKILL-equivalent).
    fn kill(&mut self);

    /// Wait up to `timeout` for the child to exit. `Some(code)` once exited.
    async fn join(&mut self, timeout: Duration) -> Option<i32>;
}

/// A freshly spawned worker: the process handle plus the manager-side pipe
/// halves (events inbound, commands outbound).
pub struct SpawnedWorker {
    pub process: Box<dyn WorkerProcess>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Spawns workers for the manager.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, mod_name: &str, config: &str) -> Result<SpawnedWorker, SpawnError>;
}

/// Terminate-then-kill with bounded joins. Returns the exit code if the
/// child died under us, `None` if it survived even SIGKILL.
pub(crate) async fn graceful_kill(process: &mut dyn WorkerProcess) -> Option<i32> {
    if !process.is_alive() {
        return process.join(Duration::ZERO).await;
    }
    process.terminate();
    if let Some(code) = process.join(KILL_JOIN).await {
        return Some(code);
    }
    tracing::info!("worker did not terminate, force killing process");
    process.kill();
    let code = process.join(KILL_JOIN).await;
    if code.is_none() {
        tracing::info!("worker still alive after force-kill");
    }
    code
}

/// Production spawner: runs `<gantryd> worker --mod … --config …` with the
/// pipe on the child's stdin/stdout.
pub struct ProcessSpawner {
    program: PathBuf,
}

impl ProcessSpawner {
    /// Spawn workers from the current executable.
    pub fn current_exe() -> Result<Self, std::io::Error> {
        Ok(Self { program: std::env::current_exe()? })
    }

    /// Spawn workers from an explicit binary path.
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, mod_name: &str, config: &str) -> Result<SpawnedWorker, SpawnError> {
        let mut child = Command::new(&self.program)
            .arg("worker")
            .arg("--mod")
            .arg(mod_name)
            .arg("--config")
            .arg(config)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let writer = child.stdin.take().ok_or(SpawnError::MissingPipes)?;
        let reader = child.stdout.take().ok_or(SpawnError::MissingPipes)?;

        tracing::info!(
            mod_name,
            config,
            pid = child.id(),
            "worker process spawned"
        );

        Ok(SpawnedWorker {
            process: Box::new(ChildProcess::new(child)),
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

/// [`WorkerProcess`] over a real OS child.
pub struct ChildProcess {
    child: Child,
    exit_code: Option<i32>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child, exit_code: None }
    }

    fn record(&mut self, status: std::process::ExitStatus) -> i32 {
        // A signal death has no code; any nonzero stand-in keeps the
        // disconnect decision correct.
        let code = status.code().unwrap_or(-1);
        self.exit_code = Some(code);
        code
    }
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn is_alive(&mut self) -> bool {
        if self.exit_code.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    fn terminate(&mut self) {
        if let Some(pid) = self.child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }

    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }

    async fn join(&mut self, timeout: Duration) -> Option<i32> {
        if let Some(code) = self.exit_code {
            return Some(code);
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(self.record(status)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for worker process");
                None
            }
            Err(_) => None,
        }
    }
}
