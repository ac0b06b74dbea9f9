// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor↔backend control vocabulary.

use serde::{Deserialize, Serialize};

/// Control message on the supervisor pipe.
///
/// The supervisor sends `stop` to request a graceful backend shutdown; the
/// backend sends `stop` to request an operator-style shutdown of the whole
/// tree and `restart` to be restarted in place. Unknown messages are logged
/// and dropped on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMsg {
    Stop,
    Restart,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
