//! Transfer engine abstraction.
//!
//! The engine owns everything protocol-related: peer discovery, piece
//! selection, verification and on-disk assembly. The rest of Undertow only
//! sees the narrow surface defined here, which lets tests substitute a
//! scripted engine that never touches the network.

mod stream;
#[cfg(test)]
pub(crate) mod test_mocks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

pub use stream::FileStream;

use crate::identifier::{ContentId, ContentSource};

/// Errors reported by a transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine rejected content {identifier}: {reason}")]
    AcquireRejected {
        identifier: ContentId,
        reason: String,
    },

    #[error("Failed to tear down {identifier}: {reason}")]
    TeardownFailed {
        identifier: ContentId,
        reason: String,
    },

    #[error("File {index} does not exist in {identifier}")]
    FileNotFound { identifier: ContentId, index: usize },

    #[error("Engine has been shut down")]
    EngineShutdown,

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Metadata readiness of a transfer.
///
/// Starts as `Pending` and settles exactly once. Any number of waiters may
/// observe the same transition through cloned receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Metadata (file names and lengths) not yet known.
    Pending,
    /// Metadata available; files can be listed and streamed.
    Ready,
    /// The engine gave up on this transfer.
    Failed { reason: String },
}

impl Readiness {
    /// Check if the transfer is still waiting for metadata
    pub fn is_pending(&self) -> bool {
        matches!(self, Readiness::Pending)
    }

    /// Check if metadata is available
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    /// Check if the transfer failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Readiness::Failed { .. })
    }
}

/// Inclusive byte interval within a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Creates an inclusive range. Callers guarantee `start <= end`.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Range covering a whole file, or `None` for an empty file.
    pub fn whole(length: u64) -> Option<Self> {
        length.checked_sub(1).map(|end| Self { start: 0, end })
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Inclusive ranges always cover at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// View of one file inside a transfer's content set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    /// Zero-based position in the content set
    pub index: usize,
    /// Path relative to the transfer's storage root
    pub relative_path: PathBuf,
    /// Total file length in bytes
    pub length: u64,
    /// Bytes the engine reports as downloaded
    pub downloaded: u64,
}

impl FileRef {
    /// File name component, used for content type detection.
    pub fn name(&self) -> &str {
        self.relative_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// True once every byte of the file has been downloaded.
    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.length
    }
}

/// A single transfer tracked by the engine.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Canonical identifier assigned by the engine.
    fn identifier(&self) -> ContentId;

    /// Subscribes to readiness changes.
    ///
    /// A receiver whose sender is dropped while still `Pending` belongs to a
    /// handle that can never become ready.
    fn readiness(&self) -> watch::Receiver<Readiness>;

    /// Display name of the content, once metadata is known.
    fn name(&self) -> Option<String>;

    /// Files in the content set. Empty until the transfer is ready.
    fn files(&self) -> Vec<FileRef>;

    /// Opens a byte stream over `range` of the file at `index`.
    ///
    /// # Errors
    /// - `EngineError::FileNotFound` - Index outside the content set
    /// - `EngineError::Io` - Underlying storage could not be opened
    fn open_stream(&self, index: usize, range: Option<ByteRange>)
    -> Result<FileStream, EngineError>;

    /// Moves `range` of the file at `index` to the front of the download
    /// queue, typically after a seek.
    ///
    /// Engines without piece scheduling accept and ignore the request.
    ///
    /// # Errors
    /// - `EngineError::FileNotFound` - Index outside the content set
    fn prioritize(&self, index: usize, range: ByteRange) -> Result<(), EngineError> {
        let _ = (index, range);
        Ok(())
    }

    /// Stops the transfer and removes its storage.
    ///
    /// # Errors
    /// - `EngineError::TeardownFailed` - Engine could not release the transfer
    async fn destroy(&self) -> Result<(), EngineError>;
}

/// Shared handle to an engine transfer.
pub type SharedHandle = Arc<dyn TransferHandle>;

/// Entry points into the transfer engine.
pub trait TransferEngine: Send + Sync {
    /// Returns the transfer the engine is already tracking for `identifier`.
    fn resolve(&self, identifier: &ContentId) -> Option<SharedHandle>;

    /// Begins acquiring `source` into `storage_dir`.
    ///
    /// Returns immediately; readiness is reported through the handle.
    ///
    /// # Errors
    /// - `EngineError::AcquireRejected` - Engine refused to start the transfer
    /// - `EngineError::EngineShutdown` - Engine no longer accepts work
    fn acquire(
        &self,
        source: &ContentSource,
        storage_dir: &Path,
    ) -> Result<SharedHandle, EngineError>;

    /// Stops all engine activity. Must be safe to call more than once.
    fn shutdown(&self);
}
