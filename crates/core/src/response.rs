// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket payload records pushed to browser subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation carried by a [`ResponseEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Op {
    /// `value` is the complete snapshot for this key; client must replace
    Full,
    /// Apply `value` at `key`
    Set,
    /// Remove `key`
    Del,
    /// Append the records in `value`; used by the log stream
    Add,
}

/// One delivery to a WebSocket subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    /// Topic name
    #[serde(rename = "t")]
    pub topic: String,

    /// Operation
    #[serde(rename = "o")]
    pub op: Op,

    /// Key path; omitted when empty
    #[serde(rename = "k", default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,

    /// Value; omitted when null (always omitted for `del`)
    #[serde(rename = "v", default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl ResponseEvent {
    /// A full-replace snapshot.
    pub fn full(topic: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { topic: topic.into(), op: Op::Full, key: Vec::new(), value: value.into() }
    }

    /// A point update at `key`.
    pub fn set(
        topic: impl Into<String>,
        key: impl IntoIterator<Item = impl Into<String>>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            topic: topic.into(),
            op: Op::Set,
            key: key.into_iter().map(Into::into).collect(),
            value: value.into(),
        }
    }

    /// A removal of `key`.
    pub fn del(
        topic: impl Into<String>,
        key: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            op: Op::Del,
            key: key.into_iter().map(Into::into).collect(),
            value: Value::Null,
        }
    }

    /// A batch append.
    pub fn add(topic: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { topic: topic.into(), op: Op::Add, key: Vec::new(), value: value.into() }
    }
}
