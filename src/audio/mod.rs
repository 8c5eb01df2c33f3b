use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to decode base64 audio: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("audio range {offset}+{len} is outside of buffer ({total} bytes)")]
    OutOfRange { offset: usize, len: usize, total: usize },

    #[error("failed to write audio: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded audio for one task. Immutable once built; clips only ever hold
/// [`AudioView`]s into it.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Bytes,
}

impl AudioBuffer {
    pub fn from_base64(encoded: &str) -> Result<Self, AudioError> {
        let decoded = STANDARD.decode(encoded.trim())?;
        debug!("Decoded {} bytes of audio", decoded.len());
        Ok(Self {
            data: Bytes::from(decoded),
        })
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes starting at `offset`. The view shares the
    /// allocation of this buffer.
    pub fn view(&self, offset: usize, len: usize) -> Result<AudioView, AudioError> {
        let end = offset.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => Ok(AudioView {
                offset,
                len,
                data: self.data.slice(offset..end),
            }),
            None => Err(AudioError::OutOfRange {
                offset,
                len,
                total: self.data.len(),
            }),
        }
    }

    pub fn whole(&self) -> AudioView {
        AudioView {
            offset: 0,
            len: self.data.len(),
            data: self.data.clone(),
        }
    }
}

/// Offset+length window into an [`AudioBuffer`].
#[derive(Debug, Clone)]
pub struct AudioView {
    offset: usize,
    len: usize,
    data: Bytes,
}

impl AudioView {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), AudioError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, &self.data).await?;
        debug!("Saved {} bytes of speech audio to {}", self.len, path.display());
        Ok(())
    }
}
