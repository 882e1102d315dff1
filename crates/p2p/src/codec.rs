use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::catalogue::CATALOGUE_SIZE_OF_PAYLOAD_BYTES;
use crate::error::NetworkError;

/// Read one length-prefixed frame. A clean end of stream before the next
/// frame yields `None`.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, NetworkError>
where
    R: AsyncReadExt + Unpin,
{
    let mut header = [0u8; CATALOGUE_SIZE_OF_PAYLOAD_BYTES];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(NetworkError::FrameTooLarge { len, max: max_len });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8], max_len: usize) -> Result<(), NetworkError>
where
    W: AsyncWriteExt + Unpin,
{
    if frame.len() > max_len || frame.len() > u32::MAX as usize {
        return Err(NetworkError::FrameTooLarge {
            len: frame.len(),
            max: max_len,
        });
    }
    writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
