// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipe wire format for supervisor↔backend and backend↔worker channels.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. The
//! framing guarantees exactly-one-message-per-read semantics; the payload is
//! a self-describing record (`ConfigEvent`, `CommandEvent`, or `ControlMsg`).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod control;
mod frame;

pub use control::ControlMsg;
pub use frame::{
    decode, encode, read_frame, read_message, write_frame, write_message, ProtocolError,
    MAX_FRAME_LEN,
};
