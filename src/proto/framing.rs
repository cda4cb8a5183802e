use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Maximum inbound message size (64MB) - prevents memory exhaustion from
/// malformed length fields. Dump blocks are the largest real messages and
/// the server chunks them well below this.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// One wire message: a type tag and its payload. The payload excludes
/// the 4-byte length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Returns true if this is an ErrorResponse ('E')
    #[inline]
    pub fn is_error(&self) -> bool {
        self.tag == super::server_tag::ERROR_RESPONSE
    }

    /// Returns true if this is a ReadyForCommand ('Z')
    #[inline]
    pub fn is_ready_for_command(&self) -> bool {
        self.tag == super::server_tag::READY_FOR_COMMAND
    }

    /// Returns true if this is an Authentication message ('R')
    #[inline]
    pub fn is_authentication(&self) -> bool {
        self.tag == super::server_tag::AUTHENTICATION
    }
}

/// Read one frame: 1-byte tag, u32 length (includes itself, excludes the
/// tag), then `length - 4` payload bytes. `read_exact` loops internally
/// until the frame is complete or the stream fails.
pub async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R) -> Result<Frame> {
    let mut hdr = [0u8; 5];
    rd.read_exact(&mut hdr).await?;
    let tag = hdr[0];
    let len = u32::from_be_bytes([hdr[1], hdr[2], hdr[3], hdr[4]]);

    if len < 4 {
        return Err(Error::Protocol(format!("invalid message length: {len}")));
    }

    let payload_len = (len - 4) as usize;

    if payload_len > MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "message too large: {payload_len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut buf = vec![0u8; payload_len];
    rd.read_exact(&mut buf).await?;
    Ok(Frame {
        tag,
        payload: Bytes::from(buf),
    })
}

/// Encode one frame into a buffer: tag, u32(payload + 4), payload.
pub fn encode_frame(buf: &mut BytesMut, tag: u8, payload: &[u8]) {
    buf.reserve(5 + payload.len());
    buf.put_u8(tag);
    buf.put_u32(payload.len() as u32 + 4);
    buf.put_slice(payload);
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(wr: &mut W, tag: u8, payload: &[u8]) -> Result<()> {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    encode_frame(&mut buf, tag, payload);
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
