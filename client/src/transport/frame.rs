//! Length-prefixed, checksummed framing for prost messages on a byte stream.
//!
//! # Frame layout
//!
//! ```text
//! | payload length: u32 LE | crc32 of payload: u32 LE | payload |
//! ```
//!
//! The payload is one prost-encoded message.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame header in bytes.
const HEADER_SIZE: usize = 8;

/// Largest payload either side accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors from reading or writing a frame.
#[derive(Debug)]
pub enum FrameError {
    /// The peer closed the stream before a complete frame arrived.
    Closed,
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// Declared length exceeds [`MAX_FRAME_LEN`].
    TooLarge(usize),
    /// Stored and computed checksums differ.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The payload is not a valid message.
    Decode(prost::DecodeError),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "stream closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::TooLarge(len) => {
                write!(f, "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}")
            }
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "frame checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::Decode(e) => write!(f, "malformed frame payload: {e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Closed
        } else {
            Self::Io(e)
        }
    }
}

/// Encode `message` and write it as one frame, then flush.
///
/// # Errors
///
/// Returns `TooLarge` if the encoded message exceeds the limit, or `Io` on a
/// write failure.
pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let payload = message.encode_to_vec();
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);

    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode its payload.
///
/// # Errors
///
/// Returns `Closed` on EOF (including EOF inside a frame), `TooLarge` or
/// `ChecksumMismatch` for a corrupt header, and `Decode` for a payload that
/// does not parse as `M`.
pub async fn read_frame<R, M>(reader: &mut R) -> Result<M, FrameError>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let actual = crc32fast::hash(&payload);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    M::decode(payload.as_slice()).map_err(FrameError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;

    fn sample_request() -> proto::ClientRequest {
        proto::ClientRequest {
            request_id: 9,
            operation_timeout: None,
            payload: Some(proto::client_request::Payload::Handshake(
                proto::HandshakeRequest {
                    database: "/local".to_string(),
                    protocol_version: proto::PROTOCOL_VERSION,
                },
            )),
        }
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = sample_request();
        write_frame(&mut client, &request).await.unwrap();
        let received: proto::ClientRequest = read_frame(&mut server).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_corrupted_payload_is_rejected() {
        let request = sample_request();
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).await.unwrap();
        let last = buffer.len() - 1;
        buffer[last] ^= 0xff;

        let result: Result<proto::ClientRequest, _> = read_frame(&mut buffer.as_slice()).await;
        assert!(matches!(result, Err(FrameError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame_reads_as_closed() {
        let request = sample_request();
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).await.unwrap();
        buffer.truncate(buffer.len() - 2);

        let result: Result<proto::ClientRequest, _> = read_frame(&mut buffer.as_slice()).await;
        assert!(matches!(result, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());

        let result: Result<proto::ClientRequest, _> = read_frame(&mut buffer.as_slice()).await;
        assert!(matches!(result, Err(FrameError::TooLarge(_))));
    }
}
