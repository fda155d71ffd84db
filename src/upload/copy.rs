//! Stream copy into a write channel

use crate::channel::{ChannelError, ChunkSink, WriteChannel};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Errors from [`copy_to_channel`]
#[derive(Error, Debug)]
pub enum CopyError<E> {
    #[error("Failed to read source: {0}")]
    Read(#[source] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError<E>),
}

/// Read `reader` to the end in blocks of `block_size` and write every block
/// to `channel`.
///
/// Returns the number of bytes the channel accepted. The channel is left
/// open. On error the block being written was not accepted; a caller that
/// wants to resume must capture the channel and continue the source from
/// [`ChannelState::resume_offset`](crate::channel::ChannelState::resume_offset).
pub async fn copy_to_channel<R, E, S>(
    reader: &mut R,
    channel: &mut WriteChannel<E, S>,
    block_size: usize,
) -> Result<u64, CopyError<S::Error>>
where
    R: AsyncRead + Unpin,
    S: ChunkSink,
{
    let mut block = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut block).await.map_err(CopyError::Read)?;
        if n == 0 {
            break;
        }
        channel.write(&block[..n]).await?;
        total += n as u64;
    }

    tracing::debug!(bytes = total, position = channel.position(), "Source copied into channel");

    Ok(total)
}
