//! Length-prefixed JSON records on a byte stream.
//!
//! Each record is a 4-byte big-endian body length followed by the UTF-8
//! JSON body.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{TransportError, TransportResult};

/// Largest accepted record body
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one record and flush.
pub async fn write_record<W>(writer: &mut W, record: &Value) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(record).map_err(TransportError::Encode)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one record. `None` when the peer closed the stream between records.
pub async fn read_record<R>(reader: &mut R) -> TransportResult<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let record = serde_json::from_slice(&body).map_err(TransportError::Decode)?;
    Ok(Some(record))
}
