//! Upload module
//!
//! HTTP transport for resumable uploads: session initiation, chunk PUTs
//! with `Content-Range`, status queries, cancellation, and helpers to feed
//! a [`WriteChannel`](crate::channel::WriteChannel) and persist its state.

use crate::retry::Retryable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod copy;
pub mod sink;
pub mod state_file;

pub use client::{HttpWriteChannel, ResumableClient, ResumableClientConfig, UploadStatus};
pub use copy::{copy_to_channel, CopyError};
pub use sink::HttpChunkSink;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upload session not found or expired")]
    SessionExpired,

    #[error("Missing Location header in session initiation response")]
    MissingSessionUri,

    #[error("Invalid Range header: {0}")]
    InvalidRange(String),

    #[error("Server persisted {persisted} bytes, expected {expected}")]
    OffsetMismatch { expected: u64, persisted: u64 },

    #[error("Final chunk not accepted, server persisted {persisted} bytes")]
    Incomplete { persisted: u64 },

    #[error("Upload completed before the final chunk")]
    PrematureCompletion,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid state file: {0}")]
    StateError(#[from] serde_json::Error),

    #[error("Inconsistent channel state: {0}")]
    InvalidState(String),
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        match self {
            UploadError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            UploadError::Status { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

/// Object an upload writes to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |status| UploadError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!UploadError::SessionExpired.is_retryable());
        assert!(!UploadError::OffsetMismatch {
            expected: 10,
            persisted: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_object_ref_display() {
        let object = ObjectRef::new("bucket", "dir/file.bin");
        assert_eq!(object.to_string(), "bucket/dir/file.bin");
    }
}
