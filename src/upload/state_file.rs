//! Channel state persistence
//!
//! Stores a [`ChannelState`] as JSON so an interrupted upload can be resumed
//! by a later process. Writes go to a sibling temp file that is synced to
//! disk and then renamed over the target, so a crash leaves either the old
//! state or the new one.

use super::UploadError;
use crate::channel::ChannelState;
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Save `state` to `path`
pub fn save<E: Serialize>(path: &Path, state: &ChannelState<E>) -> Result<(), UploadError> {
    let json = serde_json::to_vec_pretty(state)?;
    let temp = temp_path(path);
    let mut file = std::fs::File::create(&temp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&temp, path)?;

    tracing::info!(
        path = %path.display(),
        position = state.position(),
        resume_offset = state.resume_offset(),
        "Saved channel state"
    );
    Ok(())
}

/// Load a state saved with [`save`]
///
/// Rejects states no channel could have captured: a zero chunk size, or an
/// open channel without a buffer.
pub fn load<E: DeserializeOwned>(path: &Path) -> Result<ChannelState<E>, UploadError> {
    let content = std::fs::read(path)?;
    let state: ChannelState<E> = serde_json::from_slice(&content)?;

    if state.chunk_size() == 0 {
        return Err(UploadError::InvalidState(
            "chunk_size must be greater than zero".into(),
        ));
    }
    if state.is_open() && state.buffer().is_none() {
        return Err(UploadError::InvalidState(
            "open channel has no buffer".into(),
        ));
    }

    Ok(state)
}

/// Remove a state file; a missing file is not an error
pub fn remove(path: &Path) -> Result<(), UploadError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
