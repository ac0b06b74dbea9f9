// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    idle = { WorkerStatus::Idle, "idle" },
    starting = { WorkerStatus::Starting, "starting" },
    running = { WorkerStatus::Running, "running" },
    scheduler_stopping = { WorkerStatus::SchedulerStopping, "scheduler-stopping" },
    scheduler_waiting = { WorkerStatus::SchedulerWaiting, "scheduler-waiting" },
    killing = { WorkerStatus::Killing, "killing" },
    force_killing = { WorkerStatus::ForceKilling, "force-killing" },
    error = { WorkerStatus::Error, "error" },
)]
fn display_matches_wire_name(status: WorkerStatus, expected: &str) {
    assert_eq!(status.to_string(), expected);
    let encoded = serde_json::to_value(status).unwrap();
    assert_eq!(encoded, serde_json::json!(expected));
    let decoded: WorkerStatus = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, status);
}

#[test]
fn start_is_only_permitted_from_stopped_states() {
    for status in [
        WorkerStatus::Idle,
        WorkerStatus::Starting,
        WorkerStatus::Running,
        WorkerStatus::SchedulerStopping,
        WorkerStatus::SchedulerWaiting,
        WorkerStatus::Killing,
        WorkerStatus::ForceKilling,
        WorkerStatus::Error,
    ] {
        let expected = matches!(status, WorkerStatus::Idle | WorkerStatus::Error);
        assert_eq!(status.is_stopped(), expected, "{status}");
    }
}

#[test]
fn self_reportable_is_running_and_waiting_only() {
    assert!(WorkerStatus::Running.is_self_reportable());
    assert!(WorkerStatus::SchedulerWaiting.is_self_reportable());
    assert!(!WorkerStatus::SchedulerStopping.is_self_reportable());
    assert!(!WorkerStatus::Idle.is_self_reportable());
    assert!(!WorkerStatus::Killing.is_self_reportable());
}

#[test]
fn stopping_covers_all_stop_flavors() {
    assert!(WorkerStatus::SchedulerStopping.is_stopping());
    assert!(WorkerStatus::SchedulerWaiting.is_stopping());
    assert!(WorkerStatus::Killing.is_stopping());
    assert!(WorkerStatus::ForceKilling.is_stopping());
    assert!(!WorkerStatus::Running.is_stopping());
    assert!(!WorkerStatus::Error.is_stopping());

    assert!(WorkerStatus::Killing.is_killing());
    assert!(WorkerStatus::ForceKilling.is_killing());
    assert!(!WorkerStatus::SchedulerStopping.is_killing());
}
