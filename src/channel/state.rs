//! Captured write channel state

use serde::{Deserialize, Serialize};

/// Immutable snapshot of a [`WriteChannel`](super::WriteChannel).
///
/// Holds everything needed to resume the upload: the entity, the upload
/// session id, the acknowledged position, the unflushed bytes, the open
/// flag, and the chunk size. The buffer is `None` when the channel was
/// already closed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState<E> {
    entity: E,
    upload_id: String,
    position: u64,
    #[serde(default, with = "buffer_encoding")]
    buffer: Option<Vec<u8>>,
    open: bool,
    chunk_size: usize,
}

impl<E> ChannelState<E> {
    pub fn new(
        entity: E,
        upload_id: String,
        position: u64,
        buffer: Option<Vec<u8>>,
        open: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            entity,
            upload_id,
            position,
            buffer,
            open,
            chunk_size,
        }
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Offset in the source stream where writing continues after restore
    pub fn resume_offset(&self) -> u64 {
        self.position + self.buffer.as_ref().map_or(0, |b| b.len() as u64)
    }

    /// This state with `persisted` bytes acknowledged
    ///
    /// Buffered bytes the receiver already holds are dropped, and once
    /// `persisted` is past [`resume_offset`](Self::resume_offset) the buffer
    /// is empty and writing continues at `persisted`. Returns `None` when
    /// `persisted` is behind `position`, since flushed bytes are no longer
    /// available to send again.
    pub fn advanced_to(&self, persisted: u64) -> Option<Self>
    where
        E: Clone,
    {
        let skip = persisted.checked_sub(self.position)?;
        let buffer = self.buffer.as_ref().map(|buffer| {
            usize::try_from(skip)
                .ok()
                .and_then(|skip| buffer.get(skip..))
                .map(<[u8]>::to_vec)
                .unwrap_or_default()
        });

        Some(Self {
            entity: self.entity.clone(),
            upload_id: self.upload_id.clone(),
            position: persisted,
            buffer,
            open: self.open,
            chunk_size: self.chunk_size,
        })
    }
}

impl<E: std::fmt::Debug> std::fmt::Debug for ChannelState<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("entity", &self.entity)
            .field("upload_id", &self.upload_id)
            .field("position", &self.position)
            .field("buffered", &self.buffer.as_ref().map(Vec::len))
            .field("open", &self.open)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Serializes the buffer as base64 rather than a JSON array of numbers
mod buffer_encoding {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(buffer: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match buffer {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
