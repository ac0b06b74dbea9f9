// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one worker slot.
///
/// `idle`: not running. `starting`: spawn requested, process coming up.
/// `running`: worker process running a task. `scheduler-stopping`: stop
/// requested, worker finishes its current task first. `scheduler-waiting`:
/// worker idle between tasks, process alive. `killing`: stop-and-clean-up
/// requested. `force-killing`: OS-level termination in progress. `error`:
/// worker died unexpectedly; terminal until an explicit restart.
///
/// The scheduler loops forever, so there is no "stopped" state; a stopped
/// worker goes back to `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerStatus {
    Idle,
    Starting,
    Running,
    SchedulerStopping,
    SchedulerWaiting,
    Killing,
    ForceKilling,
    Error,
}

impl WorkerStatus {
    /// Wire/display name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::SchedulerStopping => "scheduler-stopping",
            Self::SchedulerWaiting => "scheduler-waiting",
            Self::Killing => "killing",
            Self::ForceKilling => "force-killing",
            Self::Error => "error",
        }
    }

    /// Not running: the only statuses a new start is permitted from.
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    /// Some form of stop is already in flight.
    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            Self::SchedulerStopping | Self::SchedulerWaiting | Self::Killing | Self::ForceKilling
        )
    }

    /// A kill (cooperative or forced) is already in flight.
    pub fn is_killing(self) -> bool {
        matches!(self, Self::Killing | Self::ForceKilling)
    }

    /// Statuses a worker may announce about itself over the pipe.
    ///
    /// Restricting self-transitions to this set lets a worker flip between
    /// "busy" and "waiting for the next job" without clobbering a pending
    /// `scheduler-stopping` request.
    pub fn is_self_reportable(self) -> bool {
        matches!(self, Self::Running | Self::SchedulerWaiting)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
