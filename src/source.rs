//! Video sources.
//!
//! A [`VideoSource`] is either a file on disk or a byte buffer held in
//! memory. Playback elements need a filesystem path, so in-memory sources are
//! written once to a [`TempLocator`] which is removed when it is dropped.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::error::FrameError;

/// A finite, read-only byte sequence containing a video container.
#[derive(Debug, Clone)]
pub enum VideoSource {
    /// A file on disk.
    File {
        /// Path to the container.
        path: PathBuf,
        /// Optional MIME type or codec hint, e.g. `video/mp4`.
        mime_hint: Option<String>,
    },
    /// Bytes held in memory.
    Memory {
        /// Container bytes, shared without copying.
        bytes: Arc<[u8]>,
        /// Optional MIME type or codec hint.
        mime_hint: Option<String>,
    },
}

impl VideoSource {
    /// A source backed by a file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        VideoSource::File {
            path: path.as_ref().to_path_buf(),
            mime_hint: None,
        }
    }

    /// A source backed by an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, mime_hint: Option<String>) -> Self {
        VideoSource::Memory {
            bytes: bytes.into(),
            mime_hint,
        }
    }

    /// The MIME or codec hint, if one was given.
    pub fn mime_hint(&self) -> Option<&str> {
        match self {
            VideoSource::File { mime_hint, .. } | VideoSource::Memory { mime_hint, .. } => {
                mime_hint.as_deref()
            }
        }
    }

    /// Size of the source in bytes.
    pub fn byte_len(&self) -> Result<u64, FrameError> {
        match self {
            VideoSource::File { path, .. } => Ok(std::fs::metadata(path)?.len()),
            VideoSource::Memory { bytes, .. } => Ok(bytes.len() as u64),
        }
    }

    /// Read the whole source into a shared buffer.
    ///
    /// Memory sources are returned without copying.
    pub fn bytes(&self) -> Result<Arc<[u8]>, FrameError> {
        match self {
            VideoSource::File { path, .. } => Ok(Arc::from(std::fs::read(path)?)),
            VideoSource::Memory { bytes, .. } => Ok(Arc::clone(bytes)),
        }
    }

    /// A human-readable name for logs and errors.
    pub fn display_name(&self) -> String {
        match self {
            VideoSource::File { path, .. } => path.display().to_string(),
            VideoSource::Memory { bytes, mime_hint } => match mime_hint {
                Some(hint) => format!("<memory {} bytes, {hint}>", bytes.len()),
                None => format!("<memory {} bytes>", bytes.len()),
            },
        }
    }

    /// Resolve a filesystem path for this source.
    ///
    /// File sources resolve to their own path; memory sources are written to
    /// a fresh temporary file.
    pub(crate) fn locate(&self) -> Result<TempLocator, FrameError> {
        match self {
            VideoSource::File { path, .. } => Ok(TempLocator::Borrowed(path.clone())),
            VideoSource::Memory { bytes, mime_hint } => {
                let suffix = suffix_for_hint(mime_hint.as_deref());
                let mut file = tempfile::Builder::new()
                    .prefix("framegrab-")
                    .suffix(suffix)
                    .tempfile()?;
                file.write_all(bytes)?;
                file.flush()?;
                log::debug!(
                    "Materialized {} bytes to {}",
                    bytes.len(),
                    file.path().display()
                );
                Ok(TempLocator::Temporary(file))
            }
        }
    }
}

impl Display for VideoSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.display_name())
    }
}

/// A path a playback element can open.
///
/// The temporary variant deletes its file on drop.
#[derive(Debug)]
pub(crate) enum TempLocator {
    Borrowed(PathBuf),
    Temporary(NamedTempFile),
}

impl TempLocator {
    pub(crate) fn path(&self) -> &Path {
        match self {
            TempLocator::Borrowed(path) => path,
            TempLocator::Temporary(file) => file.path(),
        }
    }
}

fn suffix_for_hint(hint: Option<&str>) -> &'static str {
    match hint {
        Some(h) if h.contains("webm") => ".webm",
        Some(h) if h.contains("quicktime") => ".mov",
        Some(h) if h.contains("matroska") => ".mkv",
        _ => ".mp4",
    }
}
