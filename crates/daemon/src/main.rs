// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gantryd`, the gantry process tree entry point.
//!
//! One binary, three roles: the default supervisor role owns a single
//! backend child; the hidden `backend` and `worker` roles are what the
//! supervisor and the worker manager spawn.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gantry_daemon::{backend, state_dir, BackendCommand, BackendConfig, Supervisor, SupervisorConfig};
use gantry_worker::{run_worker, ModRegistry};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gantryd", version, about = "Local automation platform supervisor")]
struct Cli {
    #[command(subcommand)]
    role: Option<Role>,
}

#[derive(Subcommand)]
enum Role {
    /// Run the supervisor (the default when no role is given)
    Run {
        /// Arguments forwarded verbatim to the backend child
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Internal: the backend child spawned by the supervisor
    #[command(hide = true)]
    Backend {
        /// WebSocket listen address
        #[arg(long, default_value = "127.0.0.1:7701")]
        listen: String,

        /// Disable the WebSocket surface
        #[arg(long)]
        no_listen: bool,
    },

    /// Internal: a worker child spawned by the backend
    #[command(hide = true)]
    Worker {
        /// Mod entry to run
        #[arg(long = "mod")]
        mod_name: String,

        /// Config the worker runs for
        #[arg(long)]
        config: String,
    },
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("GANTRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Supervisor and worker roles log to stderr; stdout belongs to the pipe.
fn init_stderr_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// The backend appends to a rolling log file under the state directory.
/// Its stdout is the supervisor pipe and must stay clean.
fn init_backend_tracing(state: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = state.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(log_dir, "backend.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let role = cli.role.unwrap_or(Role::Run { args: Vec::new() });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let code = match role {
        Role::Run { args } => {
            init_stderr_tracing();
            let command =
                BackendCommand::current_exe(args).context("failed to resolve backend command")?;
            runtime.block_on(Supervisor::new(command, SupervisorConfig::default()).run())
        }
        Role::Backend { listen, no_listen } => {
            let state = state_dir();
            let _guard = init_backend_tracing(&state)?;
            let listen = if no_listen {
                None
            } else {
                Some(listen.parse().with_context(|| format!("invalid --listen address {listen}"))?)
            };
            runtime
                .block_on(backend::run(BackendConfig { listen, state_dir: state }))
                .context("backend failed")?
        }
        Role::Worker { mod_name, config } => {
            init_stderr_tracing();
            runtime.block_on(run_worker(
                &mod_name,
                &config,
                tokio::io::stdin(),
                tokio::io::stdout(),
                &ModRegistry::builtin(),
            ))
        }
    };

    // Give spawned tasks a moment to wind down before the process exits
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    std::process::exit(code);
}
