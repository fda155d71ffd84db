//! Resumable upload HTTP client
//!
//! Speaks the JSON-API flavour of the resumable upload protocol:
//!
//! | Operation | Request | Success |
//! |-----------|---------|---------|
//! | Start session | `POST /upload/storage/v1/b/{bucket}/o?uploadType=resumable` | `200` + `Location` |
//! | Upload chunk | `PUT {session}` + `Content-Range: bytes a-b/*` | `308` (`Range: bytes=0-b`) |
//! | Final chunk | `PUT {session}` + `Content-Range: bytes a-b/total` | `200` / `201` |
//! | Query status | `PUT {session}` + `Content-Range: bytes */*` | `308` or `200` / `201` |
//! | Cancel | `DELETE {session}` | `499` or `2xx` |
//!
//! The session URI returned by the start call is the upload id used by the
//! write channel.
//!
//! # Example
//!
//! ```no_run
//! use cirrus_upload::upload::{ObjectRef, ResumableClient, ResumableClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ResumableClient::new(ResumableClientConfig::new("https://storage.googleapis.com"))?;
//! let mut channel = client
//!     .open_channel(ObjectRef::new("my-bucket", "hello.txt"), Some("text/plain"))
//!     .await?;
//! channel.write(b"Hello, World!").await?;
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

use super::{HttpChunkSink, ObjectRef, UploadError};
use crate::channel::{ChannelState, Chunk, WriteChannel};
use crate::config::Config;
use crate::retry::{RetryParams, Retryable, RetryingSink};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{RequestBuilder, Response};
use std::time::Duration;

/// Characters escaped in a bucket path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Status code the protocol uses for "resume incomplete"
const RESUME_INCOMPLETE: u16 = 308;

/// Status code returned by a cancelled session
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Write channel over the HTTP transport with retries
pub type HttpWriteChannel = WriteChannel<ObjectRef, RetryingSink<HttpChunkSink>>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ResumableClientConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: RetryParams,
    pub chunk_size: Option<usize>,
}

impl ResumableClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            timeout: None,
            retry: RetryParams::default(),
            chunk_size: None,
        }
    }
}

impl From<&Config> for ResumableClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.transport.endpoint.clone(),
            bearer_token: config.transport.bearer_token.clone(),
            timeout: Some(config.transport.timeout()),
            retry: RetryParams::from(&config.retry),
            chunk_size: Some(config.upload.chunk_size),
        }
    }
}

/// Server-side progress of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Session is open; `persisted` bytes have been stored
    Incomplete { persisted: u64 },
    /// The final chunk was accepted
    Complete,
}

/// Resumable upload client
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ResumableClient {
    config: ResumableClientConfig,
    http: reqwest::Client,
}

impl ResumableClient {
    /// Create a new client
    pub fn new(config: ResumableClientConfig) -> Result<Self, UploadError> {
        if !(config.endpoint.starts_with("http://") || config.endpoint.starts_with("https://")) {
            return Err(UploadError::InvalidEndpoint(config.endpoint));
        }

        // 308 is "resume incomplete" here, not a redirect
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    /// Create a client from the application configuration
    pub fn from_config(config: &Config) -> Result<Self, UploadError> {
        Self::new(ResumableClientConfig::from(config))
    }

    /// Get the endpoint URL without a trailing slash
    pub fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    pub fn retry_params(&self) -> &RetryParams {
        &self.config.retry
    }

    /// Start a resumable upload session and return its session URI
    #[tracing::instrument(
        name = "upload.session.start",
        skip(self),
        fields(
            upload.bucket = %object.bucket,
            upload.object = %object.name,
            http.method = "POST"
        ),
        err
    )]
    pub async fn start_session(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
    ) -> Result<String, UploadError> {
        // Starting a session has no observable side effect, so it is
        // always safe to retry.
        let mut backoff = self.config.retry.backoff();
        loop {
            match self.start_session_attempt(object, content_type).await {
                Ok(upload_id) => {
                    tracing::info!(upload_id = %upload_id, "Started resumable upload session");
                    return Ok(upload_id);
                }
                Err(err) if err.is_retryable() => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(err);
                    };
                    tracing::warn!(
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying session start"
                    );

                    #[cfg(feature = "metrics")]
                    crate::metrics::record_retry();

                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn start_session_attempt(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
    ) -> Result<String, UploadError> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint(),
            utf8_percent_encode(&object.bucket, PATH_SEGMENT)
        );

        let mut metadata = serde_json::json!({ "name": object.name });
        let mut request = self
            .http
            .post(url)
            .query(&[("uploadType", "resumable"), ("name", object.name.as_str())]);
        if let Some(content_type) = content_type {
            metadata["contentType"] = content_type.into();
            request = request.header("X-Upload-Content-Type", content_type);
        }

        let response = self.authorize(request.json(&metadata)).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or(UploadError::MissingSessionUri)?;
        location
            .to_str()
            .map(str::to_string)
            .map_err(|_| UploadError::MissingSessionUri)
    }

    /// Upload one chunk to its session
    #[tracing::instrument(
        name = "upload.chunk.put",
        skip(self, chunk),
        fields(
            http.method = "PUT",
            upload.offset = chunk.offset,
            upload.bytes = chunk.data.len(),
            upload.last = chunk.last,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn put_chunk(&self, chunk: Chunk<'_>) -> Result<UploadStatus, UploadError> {
        let request = self
            .http
            .put(chunk.upload_id)
            .header(CONTENT_RANGE, content_range(&chunk))
            .body(Bytes::copy_from_slice(chunk.data));

        let response = self.authorize(request).send().await?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());

        upload_status(response).await
    }

    /// Ask the server how many bytes of the session it has persisted
    #[tracing::instrument(
        name = "upload.session.status",
        skip(self),
        fields(http.method = "PUT"),
        err
    )]
    pub async fn query_status(&self, upload_id: &str) -> Result<UploadStatus, UploadError> {
        let request = self
            .http
            .put(upload_id)
            .header(CONTENT_RANGE, "bytes */*")
            .body(Bytes::new());

        let response = self.authorize(request).send().await?;
        upload_status(response).await
    }

    /// Cancel an upload session
    #[tracing::instrument(
        name = "upload.session.cancel",
        skip(self),
        fields(http.method = "DELETE"),
        err
    )]
    pub async fn cancel(&self, upload_id: &str) -> Result<(), UploadError> {
        let response = self.authorize(self.http.delete(upload_id)).send().await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == CLIENT_CLOSED_REQUEST {
            tracing::info!("Cancelled resumable upload session");
            return Ok(());
        }

        match status.as_u16() {
            404 | 410 => Err(UploadError::SessionExpired),
            _ => Err(status_error(response).await),
        }
    }

    /// Sink that uploads chunks through this client
    pub fn sink(&self) -> HttpChunkSink {
        HttpChunkSink::new(self.clone())
    }

    /// Start a session for `object` and open a write channel on it
    pub async fn open_channel(
        &self,
        object: ObjectRef,
        content_type: Option<&str>,
    ) -> Result<HttpWriteChannel, UploadError> {
        let upload_id = self.start_session(&object, content_type).await?;
        let sink = RetryingSink::new(self.sink(), self.config.retry.clone());
        let mut channel = WriteChannel::new(sink, object, upload_id);
        if let Some(chunk_size) = self.config.chunk_size {
            channel.set_chunk_size(chunk_size);
        }
        Ok(channel)
    }

    /// Rebuild a write channel from a captured state
    pub fn resume_channel(&self, state: &ChannelState<ObjectRef>) -> HttpWriteChannel {
        let sink = RetryingSink::new(self.sink(), self.config.retry.clone());
        WriteChannel::restore(state, sink)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// `Content-Range` value for a chunk
pub(crate) fn content_range(chunk: &Chunk<'_>) -> String {
    let total = if chunk.last {
        chunk.end().to_string()
    } else {
        "*".to_string()
    };

    if chunk.data.is_empty() {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", chunk.offset, chunk.end() - 1, total)
    }
}

/// Number of persisted bytes from a `Range: bytes=0-N` header
pub(crate) fn persisted_from_range(range: Option<&str>) -> Result<u64, UploadError> {
    let Some(range) = range else {
        return Ok(0);
    };

    range
        .strip_prefix("bytes=0-")
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| UploadError::InvalidRange(range.to_string()))
}

async fn upload_status(response: Response) -> Result<UploadStatus, UploadError> {
    match response.status().as_u16() {
        200 | 201 => Ok(UploadStatus::Complete),
        RESUME_INCOMPLETE => {
            let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
            let persisted = persisted_from_range(range)?;
            Ok(UploadStatus::Incomplete { persisted })
        }
        404 | 410 => Err(UploadError::SessionExpired),
        _ => Err(status_error(response).await),
    }
}

async fn status_error(response: Response) -> UploadError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    UploadError::Status { status, body }
}
