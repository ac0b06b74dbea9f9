// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-config log broker between the manager's I/O task and the event loop.
//!
//! Two bounded rings per config: `cache` holds the last 1024 records for
//! snapshots, `inbox` holds records pending fan-out. The producer appends to
//! the inbox first, then the cache, so any cached record that has not been
//! delivered is still in the inbox. That ordering is what makes the
//! subscription dedup sound. The doorbell fires only on the inbox's
//! empty→non-empty transition: under bursty load the drainer wakes once and
//! takes the whole batch, and with no subscribers the producer does pure
//! memory work and schedules nothing.
//!
//! Records are `Arc<Value>` and the same allocation goes into both rings, so
//! snapshot/inbox overlap is detected by pointer identity without sequence
//! numbers.

use crate::bus::TopicSender;
use gantry_core::{ConfigEvent, ResponseEvent, TOPIC_LOG};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// History ring capacity: the browser renders at most this many lines.
const CACHE_CAP: usize = 1024;
/// Pending-delivery ring capacity; oldest records drop when the event loop
/// cannot keep up.
const INBOX_CAP: usize = 1024;
/// How far past the pending run the dedup scan looks into the snapshot tail.
const DEDUP_SCAN_MARGIN: usize = 20;

/// Process-wide map of log caches, one per config.
///
/// A cache is created on first use (first log event or first subscription,
/// whichever comes first) and lives for the life of the backend.
pub struct LogCacheRegistry {
    caches: Mutex<HashMap<String, Arc<LogCache>>>,
    drain_tx: mpsc::UnboundedSender<String>,
}

impl LogCacheRegistry {
    /// Create the registry and the drainer that must be driven for fan-out.
    pub fn new() -> (Arc<Self>, LogDrainer) {
        let (drain_tx, drain_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self { caches: Mutex::new(HashMap::new()), drain_tx });
        let drainer = LogDrainer { drain_rx, registry: Arc::downgrade(&registry) };
        (registry, drainer)
    }

    /// The cache for `config`, creating it on first use.
    pub fn get_or_create(&self, config: &str) -> Arc<LogCache> {
        let mut caches = self.caches.lock();
        Arc::clone(caches.entry(config.to_string()).or_insert_with(|| {
            Arc::new(LogCache {
                config: config.to_string(),
                drain_tx: self.drain_tx.clone(),
                state: Mutex::new(CacheState::default()),
            })
        }))
    }

    /// The cache for `config`, if one exists.
    pub fn get(&self, config: &str) -> Option<Arc<LogCache>> {
        self.caches.lock().get(config).cloned()
    }
}

/// Drives log fan-out: each doorbell names a config whose inbox has work.
pub struct LogDrainer {
    drain_rx: mpsc::UnboundedReceiver<String>,
    registry: std::sync::Weak<LogCacheRegistry>,
}

impl LogDrainer {
    /// Drain doorbells until the registry is gone.
    pub async fn run(mut self) {
        while let Some(config) = self.drain_rx.recv().await {
            self.drain_one(&config);
        }
    }

    /// Process one pending doorbell; `false` if none is queued. Test hook.
    pub fn tick(&mut self) -> bool {
        match self.drain_rx.try_recv() {
            Ok(config) => {
                self.drain_one(&config);
                true
            }
            Err(_) => false,
        }
    }

    fn drain_one(&self, config: &str) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(cache) = registry.get(config) {
            cache.drain_inbox();
        }
    }
}

#[derive(Default)]
struct CacheState {
    cache: VecDeque<Arc<Value>>,
    inbox: VecDeque<Arc<Value>>,
    subscribers: Vec<TopicSender>,
}

/// One config's log broker.
pub struct LogCache {
    config: String,
    drain_tx: mpsc::UnboundedSender<String>,
    state: Mutex<CacheState>,
}

impl LogCache {
    /// Producer path; called from the manager's I/O task for every log event.
    ///
    /// Write order is load-bearing: inbox first, then cache. Both appends
    /// happen in one critical section, so a concurrent subscription snapshot
    /// can never observe a record in the cache that already left the inbox
    /// undelivered.
    pub fn on_event(&self, event: &ConfigEvent) {
        let record = Arc::new(event.value.clone());
        let mut state = self.state.lock();

        if !state.subscribers.is_empty() {
            if state.inbox.len() == INBOX_CAP {
                state.inbox.pop_front();
            }
            state.inbox.push_back(Arc::clone(&record));

            // The doorbell: only the empty→non-empty transition schedules
            // work. A longer inbox means a drain is already pending and the
            // batch just grows.
            if state.inbox.len() == 1 {
                // The event loop may already be gone during shutdown
                let _ = self.drain_tx.send(self.config.clone());
            }
        }

        if state.cache.len() == CACHE_CAP {
            state.cache.pop_front();
        }
        state.cache.push_back(record);
    }

    /// Consumer path; runs on the drainer. Takes the whole inbox as one
    /// batch and pushes it to every subscriber, dropping the batch for any
    /// subscriber whose channel is full.
    fn drain_inbox(&self) {
        let mut state = self.state.lock();
        if state.inbox.is_empty() {
            return;
        }
        let batch: Vec<Value> = state.inbox.drain(..).map(|record| (*record).clone()).collect();
        let payload = ResponseEvent::add(TOPIC_LOG, Value::Array(batch));
        for subscriber in &state.subscribers {
            // Slow consumers lose this batch rather than stalling the broker
            subscriber.send_nowait(payload.clone());
        }
    }

    /// Attach a subscriber and send it the `full` snapshot.
    ///
    /// The whole sequence runs in one critical section and the snapshot is
    /// pushed with a non-blocking send, so no `add` batch can reach the new
    /// subscriber's channel before its `full`.
    pub fn subscribe(&self, sender: &TopicSender) {
        let mut state = self.state.lock();

        // 1. Subscribe first: every record produced from now on reaches the
        //    inbox and will be drained to this sender
        if !state.subscribers.iter().any(|s| s.id() == sender.id()) {
            state.subscribers.push(sender.clone());
        }

        // 2. Snapshot, mirroring the producer's write order in reverse:
        //    cache, then inbox
        let mut snapshot: Vec<Arc<Value>> = state.cache.iter().cloned().collect();

        // 3. Dedup: if the inbox head already sits in the snapshot tail, cut
        //    the snapshot there; the pending records arrive in the next
        //    batch with no gap and no repeat
        if let Some(first_pending) = state.inbox.front() {
            let limit = snapshot.len().min(state.inbox.len() + DEDUP_SCAN_MARGIN);
            let mut cut = None;
            for (i, record) in snapshot.iter().rev().enumerate() {
                if i >= limit {
                    break;
                }
                if Arc::ptr_eq(record, first_pending) {
                    // Reverse index 0 is the last entry; cut it and
                    // everything after it
                    cut = Some(snapshot.len() - 1 - i);
                    break;
                }
            }
            if let Some(cut) = cut {
                snapshot.truncate(cut);
            }
        }

        // 4. Always send the full payload, even when empty; the browser
        //    needs the explicit replace
        let values: Vec<Value> = snapshot.iter().map(|record| (**record).clone()).collect();
        sender.send_nowait(ResponseEvent::full(TOPIC_LOG, Value::Array(values)));
    }

    /// Detach a subscriber; the inbox clears once nobody is listening.
    pub fn unsubscribe(&self, sender: &TopicSender) {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| s.id() != sender.id());
        if state.subscribers.is_empty() {
            state.inbox.clear();
        }
    }

    /// Number of records currently cached. Test hook.
    pub fn cache_len(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Number of records pending delivery. Test hook.
    pub fn inbox_len(&self) -> usize {
        self.state.lock().inbox.len()
    }

    /// Number of live subscribers. Test hook.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

#[cfg(test)]
#[path = "log_cache_tests.rs"]
mod tests;
