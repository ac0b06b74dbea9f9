// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-shape tests: short field names, omitted defaults, unknown commands.

use super::*;
use crate::WorkerStatus;
use serde_json::{json, Value};

#[test]
fn config_event_omits_default_fields() {
    let event = ConfigEvent::log("hello");
    let encoded = serde_json::to_value(&event).unwrap();
    assert_eq!(encoded, json!({"t": "Log", "v": "hello"}));
}

#[test]
fn config_event_round_trips_with_key_path() {
    let event = ConfigEvent::with_key("DataUpdate", ["task", "group", "arg"], json!({"data": 123}));
    let encoded = serde_json::to_vec(&event).unwrap();
    let decoded: ConfigEvent = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(decoded, event);
    assert_eq!(decoded.key, vec!["task", "group", "arg"]);
    assert_eq!(decoded.value, json!({"data": 123}));
}

#[test]
fn config_event_missing_fields_default() {
    let decoded: ConfigEvent = serde_json::from_str(r#"{"t": "CustomEvent"}"#).unwrap();
    assert_eq!(decoded.topic, "CustomEvent");
    assert_eq!(decoded.config, "");
    assert!(decoded.key.is_empty());
    assert_eq!(decoded.value, Value::Null);
}

#[test]
fn worker_state_event_carries_status_name() {
    let event = ConfigEvent::worker_state(WorkerStatus::SchedulerWaiting);
    assert_eq!(event.topic, TOPIC_WORKER_STATE);
    assert_eq!(event.value, json!("scheduler-waiting"));
}

#[test]
fn command_event_round_trips() {
    let event = CommandEvent::new(Command::SchedulerStopping);
    let encoded = serde_json::to_value(&event).unwrap();
    assert_eq!(encoded, json!({"c": "scheduler-stopping"}));

    let decoded: CommandEvent = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, event);
}

#[test]
fn unknown_command_decodes_to_unknown() {
    let decoded: CommandEvent = serde_json::from_str(r#"{"c": "frobnicate"}"#).unwrap();
    assert_eq!(decoded.command, Command::Unknown);
}

#[test]
fn command_names_are_kebab_case() {
    for (command, name) in [
        (Command::SchedulerStopping, "scheduler-stopping"),
        (Command::Killing, "killing"),
        (Command::ForceKilling, "force-killing"),
        (Command::TestContinue, "test-continue"),
    ] {
        let encoded = serde_json::to_value(command).unwrap();
        assert_eq!(encoded, json!(name));
    }
}
