// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Worker` topic: broadcasts worker status transitions to a browser.
//!
//! Contract: a transition to `idle` is a `del` of the config's key, anything
//! else is a `set` of the status: the minimum a client needs to render the
//! fleet.

use crate::bus::{MsgBus, Topic, TopicSender};
use crate::manager::WorkerManager;
use async_trait::async_trait;
use gantry_core::{ResponseEvent, WorkerStatus};
use serde_json::Value;
use std::sync::Arc;

/// Wire name of the fleet-status topic.
pub const WORKER_TOPIC: &str = "Worker";

/// Global topic mirroring the manager's state map.
pub struct WorkerTopic {
    sender: TopicSender,
}

impl WorkerTopic {
    /// Subscribe a connection: push the current fleet snapshot, then follow
    /// with per-transition updates from the bus.
    pub fn subscribe(bus: &MsgBus, manager: &WorkerManager, sender: TopicSender) -> Arc<Self> {
        let snapshot = manager.get_state_info();
        let value = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
        sender.send_nowait(ResponseEvent::full(WORKER_TOPIC, value));

        let topic = Arc::new(Self { sender });
        bus.subscribe_global(WORKER_TOPIC, Arc::clone(&topic) as Arc<dyn Topic>);
        topic
    }

    /// Detach from the bus.
    pub fn unsubscribe(self: Arc<Self>, bus: &MsgBus) {
        let topic: Arc<dyn Topic> = self;
        bus.unsubscribe(&topic);
    }
}

#[async_trait]
impl Topic for WorkerTopic {
    fn topic_name(&self) -> &'static str {
        WORKER_TOPIC
    }

    fn sender(&self) -> &TopicSender {
        &self.sender
    }

    async fn on_global_event(&self, _topic: &str, value: &Value) {
        let Ok((config, status)) = serde_json::from_value::<(String, WorkerStatus)>(value.clone())
        else {
            tracing::warn!(%value, "malformed worker status broadcast");
            return;
        };
        let event = if status == WorkerStatus::Idle {
            ResponseEvent::del(WORKER_TOPIC, [config])
        } else {
            ResponseEvent::set(WORKER_TOPIC, [config], status.as_str())
        };
        self.sender.send(event).await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
