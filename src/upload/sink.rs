//! HTTP chunk sink

use super::{ResumableClient, UploadError, UploadStatus};
use crate::channel::{Chunk, ChunkSink};
use async_trait::async_trait;

/// [`ChunkSink`] that PUTs chunks to a resumable upload session
///
/// Every intermediate chunk must leave the server with exactly
/// `chunk.offset + chunk.data.len()` persisted bytes; the final chunk must
/// complete the upload.
#[derive(Debug, Clone)]
pub struct HttpChunkSink {
    client: ResumableClient,
}

impl HttpChunkSink {
    pub fn new(client: ResumableClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ResumableClient {
        &self.client
    }
}

#[async_trait]
impl ChunkSink for HttpChunkSink {
    type Error = UploadError;

    async fn flush_chunk(&mut self, chunk: Chunk<'_>) -> Result<(), UploadError> {
        let status = self.client.put_chunk(chunk).await?;

        match (chunk.last, status) {
            (true, UploadStatus::Complete) => Ok(()),
            (true, UploadStatus::Incomplete { persisted }) => {
                Err(UploadError::Incomplete { persisted })
            }
            (false, UploadStatus::Incomplete { persisted }) if persisted == chunk.end() => Ok(()),
            (false, UploadStatus::Incomplete { persisted }) => Err(UploadError::OffsetMismatch {
                expected: chunk.end(),
                persisted,
            }),
            (false, UploadStatus::Complete) => Err(UploadError::PrematureCompletion),
        }
    }
}
