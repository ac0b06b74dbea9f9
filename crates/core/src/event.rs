// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipe event records exchanged between the backend and its workers.
//!
//! Field names are single letters on the wire (`t`/`c`/`k`/`v`) to keep
//! framed messages small on the high-frequency log path.

use crate::status::WorkerStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic name for log records emitted by workers.
pub const TOPIC_LOG: &str = "Log";

/// Topic name for worker status announcements (`running` / `scheduler-waiting`).
pub const TOPIC_WORKER_STATE: &str = "WorkerState";

/// Message from a worker to the backend.
///
/// The backend routes these to WebSocket subscribers of the matching topic
/// and config. The `config` field is always overwritten by the worker
/// manager on receive; a worker cannot speak for another config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEvent {
    /// Topic name
    #[serde(rename = "t")]
    pub topic: String,

    /// Config name; stamped by the manager, empty as sent by workers
    #[serde(rename = "c", default, skip_serializing_if = "String::is_empty")]
    pub config: String,

    /// Key path, usually `(task, group, arg)` but may be any custom path
    #[serde(rename = "k", default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,

    /// Value; omitted on the wire when null
    #[serde(rename = "v", default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl ConfigEvent {
    /// Create an event with a topic and value, no key path.
    pub fn new(topic: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { topic: topic.into(), config: String::new(), key: Vec::new(), value: value.into() }
    }

    /// Create an event with a key path.
    pub fn with_key(
        topic: impl Into<String>,
        key: impl IntoIterator<Item = impl Into<String>>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            topic: topic.into(),
            config: String::new(),
            key: key.into_iter().map(Into::into).collect(),
            value: value.into(),
        }
    }

    /// A log record event.
    pub fn log(value: impl Into<Value>) -> Self {
        Self::new(TOPIC_LOG, value)
    }

    /// A worker status announcement.
    pub fn worker_state(status: WorkerStatus) -> Self {
        Self::new(TOPIC_WORKER_STATE, status.as_str())
    }
}

/// Commands the backend sends to a worker.
///
/// Unknown commands deserialize to [`Command::Unknown`] and are dropped by
/// the bridge with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    /// Stop the scheduler loop after the current task
    SchedulerStopping,
    /// Stop and clean up as soon as possible
    Killing,
    /// Process will be terminated; unwind immediately
    ForceKilling,
    /// Test-harness synchronization; never sent in production
    TestContinue,
    /// Catch-all for commands this build does not know
    #[serde(other)]
    Unknown,
}

/// Message from the backend to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Command name
    #[serde(rename = "c")]
    pub command: Command,

    /// Optional payload; omitted on the wire when null
    #[serde(rename = "v", default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl CommandEvent {
    /// Create a command with no payload.
    pub fn new(command: Command) -> Self {
        Self { command, value: Value::Null }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
