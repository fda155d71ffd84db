//! Cirrus Upload - resumable uploads from the command line
//!
//! Streams a file through a resumable upload session. When `--state-file`
//! is given, an interrupted upload leaves its captured channel state behind
//! and `resume` picks it up from the last acknowledged byte.

use anyhow::Context;
use cirrus_upload::channel::ChannelState;
use cirrus_upload::config::Config;
use cirrus_upload::upload::{
    copy_to_channel, state_file, HttpWriteChannel, ObjectRef, ResumableClient, UploadStatus,
};
use clap::{Parser, Subcommand};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Cirrus Upload - resumable chunked uploads to cloud object storage
#[derive(Parser, Debug)]
#[command(name = "cirrus-upload")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file through a new resumable session
    Upload {
        /// File to upload
        file: PathBuf,

        /// Destination bucket
        #[arg(long)]
        bucket: String,

        /// Destination object name
        #[arg(long)]
        object: String,

        /// Content type recorded on the object
        #[arg(long)]
        content_type: Option<String>,

        /// Chunk size in bytes (rounded to 256 KiB)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Where to save the channel state if the upload is interrupted
        #[arg(long)]
        state_file: Option<PathBuf>,
    },

    /// Continue an interrupted upload
    Resume {
        /// The same file that was being uploaded
        file: PathBuf,

        #[arg(long)]
        state_file: PathBuf,
    },

    /// Show the server-side progress of an interrupted upload
    Status {
        #[arg(long)]
        state_file: PathBuf,
    },

    /// Cancel an interrupted upload and delete its state file
    Cancel {
        #[arg(long)]
        state_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Cirrus Upload v{}", cirrus_upload::VERSION);

    let config = match &args.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };
    let client = ResumableClient::from_config(&config)?;
    let block_size = config.upload.copy_block_size;

    let result = match args.command {
        Command::Upload {
            file,
            bucket,
            object,
            content_type,
            chunk_size,
            state_file,
        } => {
            let object = ObjectRef::new(bucket, object);
            upload(
                &client,
                &file,
                object,
                content_type.as_deref(),
                chunk_size,
                state_file.as_deref(),
                block_size,
            )
            .await
        }
        Command::Resume { file, state_file } => {
            resume(&client, &file, &state_file, block_size).await
        }
        Command::Status { state_file } => status(&client, &state_file).await,
        Command::Cancel { state_file } => cancel(&client, &state_file).await,
    };

    #[cfg(feature = "metrics")]
    if args.print_metrics {
        print!("{}", cirrus_upload::metrics::render());
    }

    result
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!(e))
}

async fn upload(
    client: &ResumableClient,
    file: &Path,
    object: ObjectRef,
    content_type: Option<&str>,
    chunk_size: Option<usize>,
    state_path: Option<&Path>,
    block_size: usize,
) -> anyhow::Result<()> {
    let mut source = File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let mut channel = client.open_channel(object, content_type).await?;
    if let Some(chunk_size) = chunk_size {
        channel.set_chunk_size(chunk_size);
    }
    info!(
        object = %channel.entity(),
        upload_id = %channel.upload_id(),
        chunk_size = channel.chunk_size(),
        "Uploading {}",
        file.display()
    );

    // Persist the session up front; after a hard kill `resume` asks the
    // server how far it got
    if let Some(path) = state_path {
        state_file::save(path, &channel.capture().await?)?;
    }

    drive(channel, &mut source, state_path, block_size).await
}

async fn resume(
    client: &ResumableClient,
    file: &Path,
    state_path: &Path,
    block_size: usize,
) -> anyhow::Result<()> {
    let state: ChannelState<ObjectRef> = state_file::load(state_path)
        .with_context(|| format!("loading state from {}", state_path.display()))?;

    if !state.is_open() {
        info!(object = %state.entity(), "Upload already finished");
        state_file::remove(state_path)?;
        return Ok(());
    }
    let saved_position = state.position();

    let persisted = match client.query_status(state.upload_id()).await? {
        UploadStatus::Complete => {
            info!(object = %state.entity(), "Server reports the upload as complete");
            state_file::remove(state_path)?;
            return Ok(());
        }
        UploadStatus::Incomplete { persisted } => persisted,
    };

    // The server may hold bytes the saved state never saw acknowledged
    let state = state.advanced_to(persisted).with_context(|| {
        format!(
            "server persisted {} bytes but the saved state is at {}",
            persisted, saved_position
        )
    })?;
    if persisted > saved_position {
        warn!(
            persisted,
            saved_position, "Server is ahead of the saved state, skipping acknowledged bytes"
        );
    }

    let mut source = File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    source.seek(SeekFrom::Start(state.resume_offset())).await?;

    info!(
        object = %state.entity(),
        position = state.position(),
        resume_offset = state.resume_offset(),
        "Resuming upload"
    );

    let channel = client.resume_channel(&state);
    drive(channel, &mut source, Some(state_path), block_size).await
}

/// Copy the rest of `source` into `channel` and close it, saving the
/// channel state on failure.
async fn drive(
    mut channel: HttpWriteChannel,
    source: &mut File,
    state_path: Option<&Path>,
    block_size: usize,
) -> anyhow::Result<()> {
    let result = async {
        copy_to_channel(source, &mut channel, block_size).await?;
        channel.close().await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            if let Some(path) = state_path {
                state_file::remove(path)?;
            }
            info!(bytes = channel.position(), object = %channel.entity(), "Upload complete");
            Ok(())
        }
        Err(err) => {
            if let Some(path) = state_path {
                match channel.capture().await {
                    Ok(state) => state_file::save(path, &state)?,
                    Err(e) => warn!(error = %e, "Failed to capture channel state"),
                }
                error!(
                    state_file = %path.display(),
                    position = channel.position(),
                    "Upload interrupted, continue it with `cirrus-upload resume`"
                );
            }
            Err(err)
        }
    }
}

async fn status(client: &ResumableClient, state_path: &Path) -> anyhow::Result<()> {
    let state: ChannelState<ObjectRef> = state_file::load(state_path)?;

    match client.query_status(state.upload_id()).await? {
        UploadStatus::Complete => println!("{}: complete", state.entity()),
        UploadStatus::Incomplete { persisted } => println!(
            "{}: {} bytes persisted, {} bytes buffered locally",
            state.entity(),
            persisted,
            state.resume_offset() - state.position()
        ),
    }
    Ok(())
}

async fn cancel(client: &ResumableClient, state_path: &Path) -> anyhow::Result<()> {
    let state: ChannelState<ObjectRef> = state_file::load(state_path)?;
    client.cancel(state.upload_id()).await?;
    state_file::remove(state_path)?;
    println!("{}: upload cancelled", state.entity());
    Ok(())
}
