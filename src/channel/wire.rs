//! Request/response framing on a channel stream
//!
//! ```text
//! Request:  +---------------+----------------+-------------+
//!           | MessageId(4)  | PayloadLen(4)  | Payload(N)  |
//!           +---------------+----------------+-------------+
//!
//! Response: +----------------+-------------+
//!           | PayloadLen(4)  | Payload(N)  |
//!           +----------------+-------------+
//! ```
//!
//! All integers are big-endian. A zero-length payload means "no payload".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Size of the request header (message id + payload length)
pub const REQUEST_HEADER_SIZE: usize = 8;

/// Size of the response header (payload length)
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub message_id: u32,
    pub payload: Option<Bytes>,
}

/// Write a request frame
pub async fn write_request<W>(
    writer: &mut W,
    message_id: u32,
    payload: Option<&[u8]>,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let payload = payload.unwrap_or(&[]);
    let len = payload_len(payload)?;

    let mut header = BytesMut::with_capacity(REQUEST_HEADER_SIZE);
    header.put_u32(message_id);
    header.put_u32(len);

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a request frame
///
/// Returns `Ok(None)` if the peer closed the stream cleanly between requests.
pub async fn read_request<R>(
    reader: &mut R,
    max_payload_size: usize,
) -> Result<Option<RawRequest>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; REQUEST_HEADER_SIZE];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[n..]).await?;

    let mut buf = &header[..];
    let message_id = buf.get_u32();
    let len = buf.get_u32() as usize;

    let payload = read_payload(reader, len, max_payload_size).await?;
    Ok(Some(RawRequest {
        message_id,
        payload,
    }))
}

/// Write a response frame
pub async fn write_response<W>(writer: &mut W, payload: Option<&[u8]>) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let payload = payload.unwrap_or(&[]);
    let len = payload_len(payload)?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a response frame
pub async fn read_response<R>(
    reader: &mut R,
    max_payload_size: usize,
) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RESPONSE_HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;

    read_payload(reader, len, max_payload_size).await
}

async fn read_payload<R>(
    reader: &mut R,
    len: usize,
    max_payload_size: usize,
) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    if len == 0 {
        return Ok(None);
    }
    if len > max_payload_size {
        return Err(TransportError::PayloadTooLarge {
            size: len,
            max: max_payload_size,
        });
    }

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload.freeze()))
}

fn payload_len(payload: &[u8]) -> Result<u32, TransportError> {
    u32::try_from(payload.len()).map_err(|_| TransportError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })
}
