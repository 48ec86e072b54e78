//! Native-messaging framing: a 4-byte little-endian length, then a UTF-8 JSON
//! body of that length.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BridgeError;

/// Largest inbound message accepted.
pub const MAX_INBOUND_LEN: usize = 1024 * 1024;

/// Read one message. Returns `Ok(None)` on a clean EOF before a new frame.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, BridgeError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_le_bytes(len_buf) as usize;
    if length > MAX_INBOUND_LEN {
        return Err(BridgeError::MessageTooLarge {
            length,
            max: MAX_INBOUND_LEN,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Write one message and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    let length = u32::try_from(body.len()).map_err(|_| BridgeError::MessageTooLarge {
        length: body.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_all(&length.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
