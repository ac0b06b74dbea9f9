// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format tests: length-prefix framing and JSON encoding.

use super::*;
use gantry_core::{Command, CommandEvent, ConfigEvent};

#[test]
fn encode_returns_json_without_length_prefix() {
    let event = CommandEvent::new(Command::Killing);
    let encoded = encode(&event).expect("encode failed");

    // encode() returns raw JSON, no length prefix
    let json_str = std::str::from_utf8(&encoded).expect("should be valid UTF-8");
    assert!(json_str.starts_with('{'), "should be JSON object: {}", json_str);
}

#[tokio::test]
async fn read_write_message_roundtrip() {
    let original = b"hello world";

    let mut buffer = Vec::new();
    write_message(&mut buffer, original).await.expect("write failed");

    // write_message adds 4-byte length prefix
    assert_eq!(buffer.len(), 4 + original.len());

    let mut cursor = std::io::Cursor::new(buffer);
    let read_back = read_message(&mut cursor).await.expect("read failed");

    assert_eq!(read_back, original);
}

#[tokio::test]
async fn write_message_adds_length_prefix() {
    let data = b"test data";

    let mut buffer = Vec::new();
    write_message(&mut buffer, data).await.expect("write failed");

    // First 4 bytes are the length prefix
    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;

    assert_eq!(len, data.len());
    assert_eq!(&buffer[4..], data);
}

#[tokio::test]
async fn read_message_reports_clean_eof_as_closed() {
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    let err = read_message(&mut cursor).await.expect_err("should fail");
    assert!(matches!(err, ProtocolError::Closed));
    assert!(err.is_closed());
}

#[tokio::test]
async fn read_message_rejects_oversize_frame() {
    let len = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
    let mut cursor = std::io::Cursor::new(len.to_vec());
    let err = read_message(&mut cursor).await.expect_err("should fail");
    assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    assert!(!err.is_closed());
}

#[tokio::test]
async fn frames_are_one_message_per_read() {
    let mut buffer = Vec::new();
    write_frame(&mut buffer, &ConfigEvent::log("first")).await.expect("write failed");
    write_frame(&mut buffer, &ConfigEvent::log("second")).await.expect("write failed");

    let mut cursor = std::io::Cursor::new(buffer);
    let first: ConfigEvent = read_frame(&mut cursor).await.expect("read failed");
    let second: ConfigEvent = read_frame(&mut cursor).await.expect("read failed");

    assert_eq!(first.value, "first");
    assert_eq!(second.value, "second");

    let err = read_frame::<_, ConfigEvent>(&mut cursor).await.expect_err("should be closed");
    assert!(err.is_closed());
}

#[tokio::test]
async fn truncated_frame_is_an_error() {
    let mut buffer = Vec::new();
    write_frame(&mut buffer, &ConfigEvent::log("payload")).await.expect("write failed");
    buffer.truncate(buffer.len() - 2);

    let mut cursor = std::io::Cursor::new(buffer);
    let err = read_frame::<_, ConfigEvent>(&mut cursor).await.expect_err("should fail");
    assert!(err.is_closed(), "mid-frame EOF counts as a closed pipe: {err}");
}
