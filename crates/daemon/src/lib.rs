// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gantry daemon library
//!
//! The backend half of the system: the worker manager that owns worker
//! child processes, the event bus and log cache that fan worker events out
//! to WebSocket topics, the top-level supervisor, and the role wiring used
//! by the `gantryd` binary.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backend;
pub mod bus;
pub mod config;
pub mod manager;
pub mod supervisor;
pub mod topic;
pub mod ws;

pub use config::{state_dir, BackendConfig, SupervisorConfig};
pub use manager::{
    EventSink, ManagerError, NoopSink, ProcessSpawner, SpawnedWorker, WorkerManager,
    WorkerProcess, WorkerSpawner, WorkerStateInfo,
};
pub use supervisor::{BackendCommand, Supervisor};
