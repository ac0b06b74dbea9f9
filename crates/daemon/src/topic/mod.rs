// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket topics: the browser-facing views over the event bus.

mod log;
mod worker;

pub use log::LogTopic;
pub use worker::{WorkerTopic, WORKER_TOPIC};
