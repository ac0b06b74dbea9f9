// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed framing and JSON record encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single framed message. A frame above this is a protocol
/// violation, not a big payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors from framing and record encoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the pipe at a message boundary.
    #[error("pipe closed")]
    Closed,

    #[error("frame of {0} bytes exceeds maximum")]
    FrameTooLarge(usize),

    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the error means the peer is gone rather than misbehaving.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

/// Encode a record as raw JSON bytes, no length prefix.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(ProtocolError::Encode)
}

/// Decode a record from raw JSON bytes.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Read one framed message. Returns [`ProtocolError::Closed`] on a clean EOF
/// at a message boundary.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Write one framed message: 4-byte big-endian length prefix, then payload.
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    let len = (data.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one framed record.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let data = read_message(reader).await?;
    decode(&data)
}

/// Encode and write one framed record.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = encode(value)?;
    write_message(writer, &data).await
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
