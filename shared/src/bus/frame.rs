//! Topic frame codec for the TCP transport
//!
//! Wire layout, little-endian length prefixes:
//!
//! ```text
//! [topic_len: u16][topic bytes][payload_len: u32][payload bytes]
//! ```
//!
//! Payloads are opaque here; envelope semantics live a layer up.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{AppError, AppResult};

/// Maximum accepted payload size (16 MiB). A length above this is treated
/// as a corrupt stream.
const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// One topic-tagged message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Read one frame from an async stream.
///
/// A clean EOF at the frame boundary maps to [`ErrorCode::NotConnected`]
/// so callers can distinguish peer close from corruption.
///
/// [`ErrorCode::NotConnected`]: crate::ErrorCode::NotConnected
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> AppResult<Frame> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(AppError::not_connected());
        }
        Err(e) => return Err(AppError::transport(format!("read topic len: {e}"))),
    }
    let topic_len = u16::from_le_bytes(len_buf) as usize;

    let mut topic_buf = vec![0u8; topic_len];
    reader
        .read_exact(&mut topic_buf)
        .await
        .map_err(|e| AppError::transport(format!("read topic: {e}")))?;
    let topic = String::from_utf8(topic_buf)
        .map_err(|_| AppError::transport("topic is not valid UTF-8"))?;

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| AppError::transport(format!("read payload len: {e}")))?;
    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(AppError::transport(format!(
            "payload length {payload_len} exceeds limit"
        )));
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::transport(format!("read payload: {e}")))?;

    Ok(Frame { topic, payload })
}

/// Write one frame to an async stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    topic: &str,
    payload: &[u8],
) -> AppResult<()> {
    let mut data = Vec::with_capacity(2 + topic.len() + 4 + payload.len());
    data.extend_from_slice(&(topic.len() as u16).to_le_bytes());
    data.extend_from_slice(topic.as_bytes());
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(payload);

    writer
        .write_all(&data)
        .await
        .map_err(|e| AppError::transport(format!("write frame: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "orders", b"hello").await.unwrap();
        write_frame(&mut buf, "dispatch", b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let f1 = read_frame(&mut cursor).await.unwrap();
        assert_eq!(f1.topic, "orders");
        assert_eq!(f1.payload, b"hello");

        let f2 = read_frame(&mut cursor).await.unwrap();
        assert_eq!(f2.topic, "dispatch");
        assert!(f2.payload.is_empty());

        // Clean EOF at the boundary
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotConnected);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.push(b'o');
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Transport);
    }
}
