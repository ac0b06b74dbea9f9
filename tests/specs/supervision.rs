// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor scenarios over shell stubs standing in for the backend.

use gantry_daemon::{BackendCommand, Supervisor, SupervisorConfig};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn sh(script: String) -> BackendCommand {
    BackendCommand { program: PathBuf::from("/bin/sh"), args: vec!["-c".into(), script] }
}

/// Emit one framed JSON string: 4-byte big-endian length prefix + payload.
fn frame_printf(json: &str) -> String {
    format!(r"printf '\000\000\000\{:03o}{}'", json.len(), json)
}

fn config(max_restarts: usize) -> SupervisorConfig {
    SupervisorConfig {
        restart_delay: Duration::from_millis(20),
        max_restart_attempts: max_restarts,
        restart_window: Duration::from_secs(60),
        startup_timeout: Duration::from_millis(400),
        graceful_shutdown_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn restart_budget_is_exhausted_by_a_crashing_backend() {
    // Announces itself, then crashes; the supervisor retries through the
    // budget and then gives up with a nonzero exit
    let script = format!("{}; exit 1", frame_printf("\"hi\""));
    let supervisor = Supervisor::new(sh(script), config(3));

    let started = Instant::now();
    let code = supervisor.run().await;

    assert_ne!(code, 0);
    // Roughly max_restart_attempts * restart_delay plus process overhead
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn startup_failure_exits_without_retries() {
    let supervisor = Supervisor::new(sh("exit 3".to_string()), config(10));

    let started = Instant::now();
    let code = supervisor.run().await;

    assert_ne!(code, 0);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "ten retries would have taken far longer; startup failures must not retry"
    );
}

#[tokio::test]
async fn operator_style_stop_exits_zero() {
    // The backend asks to stop, receives the supervisor's framed stop on
    // stdin, and exits in the graceful window
    let script = format!("{}; head -c 10 >/dev/null; exit 0", frame_printf("\"stop\""));
    let supervisor = Supervisor::new(sh(script), config(10));

    let code = supervisor.run().await;
    assert_eq!(code, 0);
}
