//! Session lifecycle management.
//!
//! A session is the registry's record of one content acquisition. It is
//! created when acquisition starts, becomes usable once the engine reports
//! metadata readiness, and disappears when destroyed or at shutdown.

mod registry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use registry::{Acquisition, SessionRegistry};

use crate::engine::{FileRef, Readiness, SharedHandle};
use crate::identifier::{ContentId, IdentifierError};

/// Errors surfaced by the session registry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] IdentifierError),

    #[error("Torrent metadata timeout for {identifier} after {}s (no seeds?)", timeout.as_secs())]
    AcquisitionTimeout {
        identifier: ContentId,
        timeout: Duration,
    },

    #[error("Acquisition of {identifier} failed: {reason}")]
    AcquisitionFailed {
        identifier: ContentId,
        reason: String,
    },

    #[error("Torrent instance is invalid: {identifier}")]
    InvalidHandle { identifier: ContentId },

    #[error("Failed to destroy {identifier}: {reason}")]
    DestroyFailed {
        identifier: ContentId,
        reason: String,
    },

    #[error("Failed to prepare storage directory {}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// True for errors caused by client input rather than engine faults.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SessionError::InvalidInput(_))
    }
}

/// Lifecycle state of a registered session, as reported by its engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Engine is still fetching metadata
    Acquiring,
    /// Metadata is available
    Ready,
    /// Engine gave up; the session is discarded on next contact
    Failed,
}

impl SessionState {
    /// Human-readable label used in status responses.
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Acquiring => "getting metadata",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }
}

impl From<&Readiness> for SessionState {
    fn from(readiness: &Readiness) -> Self {
        match readiness {
            Readiness::Pending => SessionState::Acquiring,
            Readiness::Ready => SessionState::Ready,
            Readiness::Failed { .. } => SessionState::Failed,
        }
    }
}

/// One registered acquisition and the engine handle it owns.
#[derive(Clone)]
pub struct Session {
    identifier: ContentId,
    handle: SharedHandle,
    storage_root: PathBuf,
}

impl Session {
    pub(crate) fn new(identifier: ContentId, handle: SharedHandle, storage_root: PathBuf) -> Self {
        Self {
            identifier,
            handle,
            storage_root,
        }
    }

    /// Identifier this session is registered under.
    pub fn identifier(&self) -> &ContentId {
        &self.identifier
    }

    /// Engine handle backing this session.
    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// Directory the engine writes this session's content into.
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from(&*self.handle.readiness().borrow())
    }

    /// True once the engine has reported metadata readiness.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Waits up to `limit` for the transfer to leave `Acquiring`.
    ///
    /// Returns the state observed when the wait ends.
    pub async fn settle_within(&self, limit: Duration) -> SessionState {
        let mut readiness = self.handle.readiness();
        let _ = tokio::time::timeout(limit, readiness.wait_for(|state| !state.is_pending())).await;
        self.state()
    }

    /// Content display name, when known.
    pub fn name(&self) -> Option<String> {
        self.handle.name()
    }

    /// All files in the content set.
    pub fn files(&self) -> Vec<FileRef> {
        self.handle.files()
    }

    /// File at `index`, if it exists.
    pub fn file(&self, index: usize) -> Option<FileRef> {
        self.handle.files().into_iter().nth(index)
    }

    /// On-disk location the engine uses for `file`.
    ///
    /// Reflects engine bookkeeping only; the path may not exist yet.
    pub fn local_path(&self, file: &FileRef) -> PathBuf {
        self.storage_root.join(&file.relative_path)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.identifier)
            .field("state", &self.state())
            .field("storage_root", &self.storage_root)
            .finish()
    }
}
