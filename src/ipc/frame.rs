//! Length-delimited JSON framing for the stdio transport.
//!
//! ## Frame format
//!
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded message
//!
//! The worker's stdin/stdout carry these frames exclusively, which is why
//! diagnostics go to a log file rather than the console.

use crate::ipc::envelope::{Envelope, Reply};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum message size (16 MB) to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Write a length-delimited frame to an async writer.
///
/// # Errors
///
/// Returns an error if the data exceeds MAX_MESSAGE_SIZE or if writing fails.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "message too large: {} bytes (max {})",
                data.len(),
                MAX_MESSAGE_SIZE
            ),
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-delimited frame from an async reader.
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF when reading the length)
/// - The message size exceeds MAX_MESSAGE_SIZE
/// - Reading fails
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "message too large: {} bytes (max {})",
                len, MAX_MESSAGE_SIZE
            ),
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read and deserialize an envelope from an async reader.
pub async fn read_envelope<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Envelope> {
    let data = read_frame(reader).await?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Serialize and write an envelope to an async writer.
pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> io::Result<()> {
    let json = serde_json::to_vec(envelope)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    write_frame(writer, &json).await
}

/// Serialize and write a reply to an async writer.
pub async fn write_reply<W: AsyncWriteExt + Unpin>(writer: &mut W, reply: &Reply) -> io::Result<()> {
    let json =
        serde_json::to_vec(reply).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    write_frame(writer, &json).await
}

/// Read and deserialize a reply from an async reader.
pub async fn read_reply<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Reply> {
    let data = read_frame(reader).await?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
