// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Log` topic: streams one config's log records to a browser.

use crate::bus::{LogCache, LogCacheRegistry, Topic, TopicSender};
use async_trait::async_trait;
use gantry_core::TOPIC_LOG;
use std::sync::Arc;

/// Config-scoped topic backed by the config's [`LogCache`].
///
/// Subscription delivers the `full` snapshot first; everything after arrives
/// as `add` batches straight from the cache's drainer, without touching the
/// bus dispatcher.
pub struct LogTopic {
    sender: TopicSender,
    cache: Arc<LogCache>,
}

impl LogTopic {
    /// Attach a connection to `config`'s log stream.
    pub fn subscribe(registry: &LogCacheRegistry, config: &str, sender: TopicSender) -> Arc<Self> {
        let cache = registry.get_or_create(config);
        cache.subscribe(&sender);
        Arc::new(Self { sender, cache })
    }

    /// Detach from the log stream.
    pub fn unsubscribe(&self) {
        self.cache.unsubscribe(&self.sender);
    }
}

#[async_trait]
impl Topic for LogTopic {
    fn topic_name(&self) -> &'static str {
        TOPIC_LOG
    }

    fn sender(&self) -> &TopicSender {
        &self.sender
    }
}
