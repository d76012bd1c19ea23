//! Length-framed bincode encoding.
//!
//! A frame is a big-endian `u32` payload length followed by the bincode
//! payload. The same functions run on both ends of every socket.

use crate::error::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single frame. Anything larger is treated as garbage.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| BridgeError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| BridgeError::MalformedMessage(e.to_string()))
}

fn frame_len(payload: &[u8]) -> Result<u32> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(BridgeError::Serialization(format!(
            "payload of {} bytes exceeds the {MAX_FRAME_SIZE} byte frame limit",
            payload.len()
        )));
    }
    Ok(payload.len() as u32)
}

fn checked_len(len: u32) -> Result<usize> {
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        return Err(BridgeError::MalformedMessage(format!(
            "frame announces {len} bytes, limit is {MAX_FRAME_SIZE}"
        )));
    }
    Ok(len)
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = frame_len(payload)?;
    writer
        .write_all(&len.to_be_bytes())
        .map_err(BridgeError::from_stream_error)?;
    writer
        .write_all(payload)
        .map_err(BridgeError::from_stream_error)?;
    writer.flush().map_err(BridgeError::from_stream_error)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader
        .read_exact(&mut len)
        .map_err(BridgeError::from_stream_error)?;
    let len = checked_len(u32::from_be_bytes(len))?;

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .map_err(BridgeError::from_stream_error)?;
    Ok(data)
}

pub async fn write_frame_async<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = frame_len(payload)?;
    writer
        .write_u32(len)
        .await
        .map_err(BridgeError::from_stream_error)?;
    writer
        .write_all(payload)
        .await
        .map_err(BridgeError::from_stream_error)?;
    writer.flush().await.map_err(BridgeError::from_stream_error)
}

pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader
        .read_u32()
        .await
        .map_err(BridgeError::from_stream_error)?;
    let len = checked_len(len)?;

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(BridgeError::from_stream_error)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControlRequest, HostRequest, PluginKind, Removed};
    use std::io::Cursor;
    use std::path::PathBuf;

    #[test]
    fn test_truncated_payload_is_malformed() {
        let request = HostRequest {
            plugin_kind: PluginKind::Vst3,
            plugin_path: PathBuf::from("/plugins/Synth.vst3"),
            endpoint_base_dir: PathBuf::from("/tmp/yabridge-Synth-abc123"),
        };
        let bytes = encode(&request).unwrap();

        let result: Result<HostRequest> = decode(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(BridgeError::MalformedMessage(_))));
    }

    #[test]
    fn test_out_of_range_discriminant_is_malformed() {
        let mut bytes = encode(&ControlRequest::Removed(Removed {
            owner_instance_id: 7,
        }))
        .unwrap();
        // bincode writes enum variants as a leading u32
        bytes[..4].copy_from_slice(&99u32.to_le_bytes());

        let result: Result<ControlRequest> = decode(&bytes);
        assert!(matches!(result, Err(BridgeError::MalformedMessage(_))));
    }

    #[test]
    fn test_frames_are_length_prefixed_big_endian() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"hello").unwrap();

        assert_eq!(&buffer[..4], &[0, 0, 0, 5]);
        assert_eq!(read_frame(&mut Cursor::new(buffer)).unwrap(), b"hello");
    }

    #[test]
    fn test_read_frame_on_closed_stream_is_disconnect() {
        let result = read_frame(&mut Cursor::new(Vec::<u8>::new()));
        assert!(matches!(result, Err(BridgeError::Disconnected)));

        // Peer hung up halfway through a payload
        let result = read_frame(&mut Cursor::new(vec![0, 0, 0, 10, 1, 2]));
        assert!(matches!(result, Err(BridgeError::Disconnected)));
    }

    #[test]
    fn test_oversized_frame_is_rejected_before_allocating() {
        let result = read_frame(&mut Cursor::new(vec![0xff, 0xff, 0xff, 0xff]));
        assert!(matches!(result, Err(BridgeError::MalformedMessage(_))));
    }

    #[tokio::test]
    async fn test_async_frames_match_blocking_frames() {
        let mut async_buffer = Vec::new();
        write_frame_async(&mut async_buffer, b"frame").await.unwrap();

        let mut blocking_buffer = Vec::new();
        write_frame(&mut blocking_buffer, b"frame").unwrap();
        assert_eq!(async_buffer, blocking_buffer);

        let mut reader = async_buffer.as_slice();
        assert_eq!(read_frame_async(&mut reader).await.unwrap(), b"frame");
    }
}
