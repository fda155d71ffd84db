//! Resumable write channel
//!
//! Buffers caller-supplied bytes and hands chunk-aligned prefixes of the
//! buffer to a [`ChunkSink`]. The channel can be captured into a
//! [`ChannelState`] at any point and restored later, possibly in another
//! process, continuing the upload from the same logical offset.
//!
//! # Example
//!
//! ```no_run
//! use cirrus_upload::channel::{Chunk, ChunkSink, WriteChannel};
//!
//! struct Discard;
//!
//! #[async_trait::async_trait]
//! impl ChunkSink for Discard {
//!     type Error = std::io::Error;
//!
//!     async fn flush_chunk(&mut self, _chunk: Chunk<'_>) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut channel = WriteChannel::new(Discard, "object".to_string(), "session-1".to_string());
//! channel.write(b"hello").await?;
//! let state = channel.capture().await?;
//! channel.close().await?;
//!
//! let mut resumed = WriteChannel::restore(&state, Discard);
//! resumed.write(b" world").await?;
//! resumed.close().await?;
//! # Ok(())
//! # }
//! ```

mod state;

pub use state::ChannelState;

use async_trait::async_trait;
use thiserror::Error;

/// Minimum flush granularity (256 KiB)
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;

/// Default chunk size (2 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * MIN_CHUNK_SIZE;

/// Write channel errors
#[derive(Error, Debug)]
pub enum ChannelError<E> {
    #[error("Channel is closed")]
    Closed,

    #[error("Chunk flush failed: {0}")]
    Flush(#[source] E),
}

impl<E> ChannelError<E> {
    /// Returns the flush error, if this is one
    pub fn into_flush_error(self) -> Option<E> {
        match self {
            ChannelError::Flush(err) => Some(err),
            ChannelError::Closed => None,
        }
    }
}

/// A byte range handed to a [`ChunkSink`]
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Upload session the bytes belong to
    pub upload_id: &'a str,
    /// Absolute offset of `data[0]` in the upload stream
    pub offset: u64,
    /// Bytes to send
    pub data: &'a [u8],
    /// Whether this is the terminal chunk of the upload
    pub last: bool,
}

impl Chunk<'_> {
    /// Offset one past the last byte of this chunk
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Transport that uploads chunks to a resumable-upload session.
///
/// A sink must report failure through its error type rather than silently
/// truncate. The channel only considers bytes sent once `flush_chunk`
/// returns `Ok`.
#[async_trait]
pub trait ChunkSink: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Alignment required for every non-final chunk
    fn min_chunk_size(&self) -> usize {
        MIN_CHUNK_SIZE
    }

    /// Chunk size used by freshly created channels
    fn default_chunk_size(&self) -> usize {
        8 * self.min_chunk_size()
    }

    /// Upload `chunk.data` at `chunk.offset`
    async fn flush_chunk(&mut self, chunk: Chunk<'_>) -> Result<(), Self::Error>;
}

/// Buffering, chunk-aligning write channel
///
/// `E` is the entity the channel writes to and `S` the transport. The
/// channel is driven by a single owner; it holds no locks.
pub struct WriteChannel<E, S> {
    sink: S,
    entity: E,
    upload_id: String,
    position: u64,
    buffer: Vec<u8>,
    open: bool,
    chunk_size: usize,
    min_chunk_size: usize,
}

impl<E, S: ChunkSink> WriteChannel<E, S> {
    /// Create an open channel bound to an already initiated upload session
    pub fn new(sink: S, entity: E, upload_id: String) -> Self {
        let min_chunk_size = sink.min_chunk_size().max(1);
        let mut channel = Self {
            chunk_size: min_chunk_size,
            min_chunk_size,
            sink,
            entity,
            upload_id,
            position: 0,
            buffer: Vec::new(),
            open: true,
        };
        channel.set_chunk_size(channel.sink.default_chunk_size());
        channel
    }

    /// Rebuild a channel from a captured state
    ///
    /// The buffered bytes are copied, so the same state can be restored more
    /// than once. The recorded chunk size is re-aligned to the sink's
    /// minimum, so a state written for another sink (or edited by hand)
    /// still yields a valid chunk size.
    pub fn restore(state: &ChannelState<E>, sink: S) -> Self
    where
        E: Clone,
    {
        let min_chunk_size = sink.min_chunk_size().max(1);
        let buffer = state.buffer().map(<[u8]>::to_vec).unwrap_or_default();

        tracing::debug!(
            upload_id = %state.upload_id(),
            position = state.position(),
            buffered = buffer.len(),
            open = state.is_open(),
            "Restored write channel"
        );

        #[cfg(feature = "metrics")]
        crate::metrics::record_state_restore();

        let mut channel = Self {
            sink,
            entity: state.entity().clone(),
            upload_id: state.upload_id().to_string(),
            position: state.position(),
            buffer,
            open: state.is_open(),
            chunk_size: min_chunk_size,
            min_chunk_size,
        };
        channel.set_chunk_size(state.chunk_size());
        channel
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Bytes acknowledged by the sink so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes held in the buffer, not yet flushed
    pub fn limit(&self) -> usize {
        self.buffer.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Set the flush threshold.
    ///
    /// The value is rounded down to a multiple of the minimum chunk size and
    /// never drops below it.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        let aligned = (chunk_size / self.min_chunk_size) * self.min_chunk_size;
        self.chunk_size = aligned.max(self.min_chunk_size);
    }

    /// Append `src` to the buffer, flushing if a chunk is ready.
    ///
    /// Returns the number of bytes accepted, which is always `src.len()`.
    /// If the triggered flush fails the appended bytes are dropped again and
    /// the channel is left as it was before the call.
    pub async fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError<S::Error>> {
        self.ensure_open()?;

        let limit = self.buffer.len();
        if self.buffer.capacity() - limit < src.len() {
            let target = self.chunk_size.max(limit + src.len());
            self.buffer.reserve_exact(target - limit);
        }
        self.buffer.extend_from_slice(src);

        if let Err(err) = self.flush().await {
            self.buffer.truncate(limit);
            return Err(err);
        }

        Ok(src.len())
    }

    /// Send the remaining bytes as the final chunk and close the channel.
    ///
    /// Closing a closed channel does nothing.
    #[tracing::instrument(
        name = "channel.close",
        skip_all,
        fields(
            upload_id = %self.upload_id,
            position = self.position,
            upload.bytes = self.buffer.len()
        ),
        err
    )]
    pub async fn close(&mut self) -> Result<(), ChannelError<S::Error>> {
        if !self.open {
            return Ok(());
        }

        let chunk = Chunk {
            upload_id: &self.upload_id,
            offset: self.position,
            data: &self.buffer,
            last: true,
        };
        if let Err(err) = self.sink.flush_chunk(chunk).await {
            #[cfg(feature = "metrics")]
            crate::metrics::record_flush_failure();
            return Err(ChannelError::Flush(err));
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_chunk_flushed(self.buffer.len() as u64, true);

        self.position += self.buffer.len() as u64;
        self.open = false;
        self.buffer = Vec::new();

        tracing::info!(total_bytes = self.position, "Write channel closed");

        Ok(())
    }

    /// Snapshot the channel without closing it.
    ///
    /// An open channel first flushes any chunk that is ready, then copies the
    /// remaining buffered bytes into the snapshot. A closed channel yields a
    /// snapshot without a buffer.
    pub async fn capture(&mut self) -> Result<ChannelState<E>, ChannelError<S::Error>>
    where
        E: Clone,
    {
        let buffer = if self.open {
            self.flush().await?;
            Some(self.buffer.clone())
        } else {
            None
        };

        #[cfg(feature = "metrics")]
        crate::metrics::record_state_capture();

        tracing::debug!(
            upload_id = %self.upload_id,
            position = self.position,
            buffered = self.buffer.len(),
            open = self.open,
            "Captured write channel"
        );

        Ok(ChannelState::new(
            self.entity.clone(),
            self.upload_id.clone(),
            self.position,
            buffer,
            self.open,
            self.chunk_size,
        ))
    }

    fn ensure_open(&self) -> Result<(), ChannelError<S::Error>> {
        if self.open {
            Ok(())
        } else {
            Err(ChannelError::Closed)
        }
    }

    async fn flush(&mut self) -> Result<(), ChannelError<S::Error>> {
        let limit = self.buffer.len();
        if limit < self.chunk_size {
            return Ok(());
        }

        let length = limit - limit % self.min_chunk_size;
        let chunk = Chunk {
            upload_id: &self.upload_id,
            offset: self.position,
            data: &self.buffer[..length],
            last: false,
        };

        tracing::debug!(
            upload_id = %self.upload_id,
            offset = self.position,
            length,
            "Flushing chunk"
        );

        if let Err(err) = self.sink.flush_chunk(chunk).await {
            #[cfg(feature = "metrics")]
            crate::metrics::record_flush_failure();
            return Err(ChannelError::Flush(err));
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_chunk_flushed(length as u64, false);

        self.position += length as u64;
        let mut compacted = Vec::with_capacity(self.chunk_size);
        compacted.extend_from_slice(&self.buffer[length..]);
        self.buffer = compacted;

        Ok(())
    }
}

impl<E: std::fmt::Debug, S> std::fmt::Debug for WriteChannel<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteChannel")
            .field("entity", &self.entity)
            .field("upload_id", &self.upload_id)
            .field("position", &self.position)
            .field("limit", &self.buffer.len())
            .field("chunk_size", &self.chunk_size)
            .field("open", &self.open)
            .finish()
    }
}
