// src/ipc/frame.rs

//! Wire framing shared by both IPC protocols.
//!
//! A frame is a 4-byte big-endian unsigned length followed by exactly that
//! many bytes of UTF-8 JSON.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{PlugvisorError, Result};

/// Largest payload accepted in either direction (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize `value` into a complete frame (prefix + payload).
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(PlugvisorError::IpcProtocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
/// boundary. A stream that ends inside a frame, an oversized length prefix,
/// or a payload that is not valid JSON for `T` is an `IpcProtocol` error.
pub async fn read_frame_opt<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(PlugvisorError::IpcProtocol(format!(
                "stream closed after {filled} of 4 length-prefix bytes"
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(PlugvisorError::IpcProtocol(format!(
            "announced frame length {} exceeds limit of {} bytes",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PlugvisorError::IpcProtocol(format!(
                "stream closed before the {len}-byte payload was complete"
            ))
        } else {
            PlugvisorError::IoError(e)
        }
    })?;

    let value = serde_json::from_slice(&payload)
        .map_err(|e| PlugvisorError::IpcProtocol(format!("malformed frame payload: {e}")))?;
    Ok(Some(value))
}

/// Read one frame; a clean end of stream is a `ConnectionError`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    read_frame_opt(reader)
        .await?
        .ok_or_else(|| PlugvisorError::ConnectionError("peer closed the connection".to_string()))
}
