//! Cirrus Upload Library
//!
//! Resumable chunked uploads to cloud object storage.
//!
//! # Features
//!
//! - **Write Channel**: Buffers writes and flushes aligned chunks to a pluggable sink
//! - **Capture/Restore**: Snapshot an upload and resume it in another process
//! - **HTTP Transport**: JSON-API resumable upload protocol over reqwest
//! - **Retries**: Exponential backoff around transient transport failures
//!
//! # Example
//!
//! ```no_run
//! use cirrus_upload::{config::Config, upload::{ObjectRef, ResumableClient}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let client = ResumableClient::from_config(&config)?;
//!     let mut channel = client
//!         .open_channel(ObjectRef::new("my-bucket", "data.bin"), None)
//!         .await?;
//!     channel.write(b"payload").await?;
//!     channel.close().await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod retry;
pub mod upload;

#[cfg(feature = "metrics")]
pub mod metrics;

// Re-export commonly used types
pub use channel::{ChannelError, ChannelState, Chunk, ChunkSink, WriteChannel};
pub use config::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
