// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus: routes worker-originated and internal global events to
//! subscribed WebSocket topics.
//!
//! Two bounded channels feed one dispatcher task. Global events route by
//! topic name; config events route by `(config, topic name)`, so an event
//! from one config is never delivered to another config's subscribers.

mod log_cache;

pub use log_cache::{LogCache, LogCacheRegistry, LogDrainer};

use async_trait::async_trait;
use gantry_core::{ConfigEvent, ResponseEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Global channel capacity.
const MSGBUS_GLOBAL_DEPTH: usize = 64;
/// Config channel capacity; sized for bursty worker event streams.
const MSGBUS_CONFIG_DEPTH: usize = 1024;

static NEXT_SENDER_ID: AtomicU64 = AtomicU64::new(1);

/// Push endpoint for one WebSocket connection.
///
/// `send_nowait` never blocks: a full channel drops the delivery, because a
/// slow browser must not stall the backend.
#[derive(Clone)]
pub struct TopicSender {
    id: u64,
    tx: mpsc::Sender<ResponseEvent>,
}

impl TopicSender {
    pub fn new(tx: mpsc::Sender<ResponseEvent>) -> Self {
        Self { id: NEXT_SENDER_ID.fetch_add(1, Ordering::Relaxed), tx }
    }

    /// Identity of the connection behind this sender.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking push; `false` means the delivery was dropped.
    pub fn send_nowait(&self, event: ResponseEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Blocking push; `false` means the connection is gone.
    pub async fn send(&self, event: ResponseEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// A polymorphic subscriber on the bus.
///
/// Topics override the handler for the class of events they care about; the
/// bus invokes handlers from its dispatcher task.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Unique name the wire protocol uses for this topic.
    fn topic_name(&self) -> &'static str;

    /// The connection this topic pushes to.
    fn sender(&self) -> &TopicSender;

    /// A global event with a matching topic key arrived.
    async fn on_global_event(&self, topic: &str, value: &Value) {
        let _ = (topic, value);
    }

    /// A config-scoped event with a matching `(config, topic)` key arrived.
    async fn on_config_event(&self, event: &ConfigEvent) {
        let _ = event;
    }
}

#[derive(Default)]
struct Registry {
    global: Mutex<HashMap<String, Vec<Arc<dyn Topic>>>>,
    config: Mutex<HashMap<(String, String), Vec<Arc<dyn Topic>>>>,
}

/// Sender half of the event bus. Cheap to clone.
#[derive(Clone)]
pub struct MsgBus {
    global_tx: mpsc::Sender<(String, Value)>,
    config_tx: mpsc::Sender<ConfigEvent>,
    registry: Arc<Registry>,
}

impl MsgBus {
    /// Create the bus and the dispatcher that must be driven for delivery.
    pub fn new() -> (Self, MsgBusDriver) {
        let (global_tx, global_rx) = mpsc::channel(MSGBUS_GLOBAL_DEPTH);
        let (config_tx, config_rx) = mpsc::channel(MSGBUS_CONFIG_DEPTH);
        let registry = Arc::new(Registry::default());
        let bus = Self { global_tx, config_tx, registry: Arc::clone(&registry) };
        (bus, MsgBusDriver { global_rx, config_rx, registry })
    }

    /// Register a topic for global events with key `topic_key`.
    pub fn subscribe_global(&self, topic_key: &str, topic: Arc<dyn Topic>) {
        let mut global = self.registry.global.lock();
        global.entry(topic_key.to_string()).or_default().push(topic);
    }

    /// Register a topic for config events with key `(config, topic_key)`.
    pub fn subscribe_config(&self, config: &str, topic_key: &str, topic: Arc<dyn Topic>) {
        let mut map = self.registry.config.lock();
        map.entry((config.to_string(), topic_key.to_string())).or_default().push(topic);
    }

    /// Remove every registration whose sender belongs to `topic`'s connection.
    pub fn unsubscribe(&self, topic: &Arc<dyn Topic>) {
        let id = topic.sender().id();
        let name = topic.topic_name();
        {
            let mut global = self.registry.global.lock();
            for handlers in global.values_mut() {
                handlers.retain(|t| !(t.sender().id() == id && t.topic_name() == name));
            }
            global.retain(|_, handlers| !handlers.is_empty());
        }
        {
            let mut config = self.registry.config.lock();
            for handlers in config.values_mut() {
                handlers.retain(|t| !(t.sender().id() == id && t.topic_name() == name));
            }
            config.retain(|_, handlers| !handlers.is_empty());
        }
    }

    /// Enqueue a global event. Non-blocking; `false` means the bus is full
    /// or gone.
    pub fn send_global(&self, topic: &str, value: Value) -> bool {
        self.global_tx.try_send((topic.to_string(), value)).is_ok()
    }

    /// Enqueue a config event. Non-blocking; `false` means the bus is full
    /// or gone.
    pub fn send_config(&self, event: ConfigEvent) -> bool {
        self.config_tx.try_send(event).is_ok()
    }
}

/// Receiver half: drains both channels and invokes matching handlers.
pub struct MsgBusDriver {
    global_rx: mpsc::Receiver<(String, Value)>,
    config_rx: mpsc::Receiver<ConfigEvent>,
    registry: Arc<Registry>,
}

impl MsgBusDriver {
    /// Dispatch until every sender is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.global_rx.recv() => match msg {
                    Some((topic, value)) => self.dispatch_global(&topic, &value).await,
                    None => break,
                },
                event = self.config_rx.recv() => match event {
                    Some(event) => self.dispatch_config(&event).await,
                    None => break,
                },
            }
        }
    }

    async fn dispatch_global(&self, topic: &str, value: &Value) {
        let handlers = {
            let global = self.registry.global.lock();
            global.get(topic).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler.on_global_event(topic, value).await;
        }
    }

    async fn dispatch_config(&self, event: &ConfigEvent) {
        let handlers = {
            let config = self.registry.config.lock();
            config.get(&(event.config.clone(), event.topic.clone())).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler.on_config_event(event).await;
        }
    }

    /// Process at most one queued event; `false` when both queues are empty.
    /// Test hook for deterministic dispatch.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn tick(&mut self) -> bool {
        if let Ok((topic, value)) = self.global_rx.try_recv() {
            self.dispatch_global(&topic, &value).await;
            return true;
        }
        if let Ok(event) = self.config_rx.try_recv() {
            self.dispatch_config(&event).await;
            return true;
        }
        false
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
