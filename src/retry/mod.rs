//! Retry policy
//!
//! Exponential backoff around transient transport failures. The write
//! channel never retries on its own; wrap its sink in a [`RetryingSink`]
//! to get retries on chunk uploads.

use crate::channel::{Chunk, ChunkSink};
use crate::config::RetryConfig;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Error classification for the retry loop
pub trait Retryable {
    /// Whether the failed operation may succeed if repeated
    fn is_retryable(&self) -> bool;
}

/// Retry parameters
///
/// Attempts continue while fewer than `min_attempts` have been made, or
/// while fewer than `max_attempts` have been made and the total retry
/// period has not elapsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryParams {
    pub min_attempts: u32,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub total_retry_period: Duration,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            min_attempts: 3,
            max_attempts: 6,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(32_000),
            backoff_factor: 2.0,
            total_retry_period: Duration::from_millis(50_000),
        }
    }
}

impl RetryParams {
    /// Parameters that never retry
    pub fn no_retries() -> Self {
        Self {
            min_attempts: 1,
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            total_retry_period: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Start tracking a new operation
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            params: self,
            attempts: 0,
            started: Instant::now(),
        }
    }
}

impl From<&RetryConfig> for RetryParams {
    fn from(config: &RetryConfig) -> Self {
        Self {
            min_attempts: config.min_attempts,
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_millis),
            max_delay: Duration::from_millis(config.max_delay_millis),
            backoff_factor: config.backoff_factor,
            total_retry_period: Duration::from_millis(config.total_timeout_millis),
        }
    }
}

/// Attempt bookkeeping for one retried operation
#[derive(Debug)]
pub struct Backoff<'a> {
    params: &'a RetryParams,
    attempts: u32,
    started: Instant,
}

impl Backoff<'_> {
    /// Record a failed attempt and return the delay before the next one,
    /// or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        let elapsed = self.started.elapsed();
        let within_budget = self.attempts < self.params.max_attempts
            && elapsed < self.params.total_retry_period;
        if self.attempts < self.params.min_attempts || within_budget {
            Some(self.params.delay_for(self.attempts))
        } else {
            None
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sink wrapper that re-sends a chunk after retryable failures
#[derive(Debug, Clone)]
pub struct RetryingSink<S> {
    inner: S,
    params: RetryParams,
}

impl<S> RetryingSink<S> {
    pub fn new(inner: S, params: RetryParams) -> Self {
        Self { inner, params }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn params(&self) -> &RetryParams {
        &self.params
    }
}

#[async_trait]
impl<S> ChunkSink for RetryingSink<S>
where
    S: ChunkSink,
    S::Error: Retryable,
{
    type Error = S::Error;

    fn min_chunk_size(&self) -> usize {
        self.inner.min_chunk_size()
    }

    fn default_chunk_size(&self) -> usize {
        self.inner.default_chunk_size()
    }

    async fn flush_chunk(&mut self, chunk: Chunk<'_>) -> Result<(), Self::Error> {
        let mut backoff = self.params.backoff();
        loop {
            match self.inner.flush_chunk(chunk).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    let Some(delay) = backoff.next_delay() else {
                        tracing::warn!(
                            upload_id = %chunk.upload_id,
                            offset = chunk.offset,
                            attempts = backoff.attempts(),
                            error = %err,
                            "Giving up on chunk upload"
                        );
                        return Err(err);
                    };

                    tracing::warn!(
                        upload_id = %chunk.upload_id,
                        offset = chunk.offset,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying chunk upload"
                    );

                    #[cfg(feature = "metrics")]
                    crate::metrics::record_retry();

                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
