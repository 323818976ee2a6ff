//! Scripted engine used by the registry unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    ByteRange, EngineError, FileRef, FileStream, Readiness, SharedHandle, TransferEngine,
    TransferHandle,
};
use crate::identifier::{ContentId, ContentSource};

type HandleMap = Arc<Mutex<HashMap<ContentId, Arc<MockHandle>>>>;

/// What a freshly acquired handle does on its own.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Stay pending until the test settles it
    Manual,
    /// Report readiness immediately
    Ready,
    /// Fail immediately with the given reason
    Fail(String),
    /// Refuse the acquire call outright
    Reject,
}

pub struct MockHandle {
    identifier: ContentId,
    sender: Mutex<Option<watch::Sender<Readiness>>>,
    receiver: watch::Receiver<Readiness>,
    files: Vec<FileRef>,
    handles: HandleMap,
    pub destroy_calls: AtomicUsize,
    pub fail_destroy: AtomicBool,
}

impl MockHandle {
    pub fn set_ready(&self) {
        self.settle(Readiness::Ready);
    }

    pub fn fail(&self, reason: &str) {
        self.settle(Readiness::Failed {
            reason: reason.to_string(),
        });
    }

    /// Drops the readiness sender while still pending.
    pub fn abandon(&self) {
        self.sender.lock().take();
    }

    fn settle(&self, readiness: Readiness) {
        if let Some(sender) = self.sender.lock().as_ref() {
            sender.send_replace(readiness);
        }
    }
}

#[async_trait]
impl TransferHandle for MockHandle {
    fn identifier(&self) -> ContentId {
        self.identifier.clone()
    }

    fn readiness(&self) -> watch::Receiver<Readiness> {
        self.receiver.clone()
    }

    fn name(&self) -> Option<String> {
        Some("mock".to_string())
    }

    fn files(&self) -> Vec<FileRef> {
        if self.receiver.borrow().is_ready() {
            self.files.clone()
        } else {
            Vec::new()
        }
    }

    fn open_stream(
        &self,
        index: usize,
        _range: Option<ByteRange>,
    ) -> Result<FileStream, EngineError> {
        Err(EngineError::FileNotFound {
            identifier: self.identifier.clone(),
            index,
        })
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(EngineError::TeardownFailed {
                identifier: self.identifier.clone(),
                reason: "storage busy".to_string(),
            });
        }
        self.handles.lock().remove(&self.identifier);
        Ok(())
    }
}

pub struct MockEngine {
    handles: HandleMap,
    behavior: Mutex<MockBehavior>,
    canonical: Mutex<Option<ContentId>>,
    pub acquire_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
}

impl MockEngine {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
            behavior: Mutex::new(behavior),
            canonical: Mutex::new(None),
            acquire_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Makes the next acquired handle report a different canonical identifier.
    pub fn assign_canonical(&self, identifier: ContentId) {
        *self.canonical.lock() = Some(identifier);
    }

    pub fn handle(&self, identifier: &ContentId) -> Option<Arc<MockHandle>> {
        self.handles.lock().get(identifier).cloned()
    }

    pub fn acquire_count(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Registers a handle as if a previous caller had added it.
    pub fn preload(&self, identifier: ContentId, readiness: Readiness) -> Arc<MockHandle> {
        let handle = self.build_handle(identifier, readiness);
        self.handles
            .lock()
            .insert(handle.identifier.clone(), handle.clone());
        handle
    }

    fn build_handle(&self, identifier: ContentId, readiness: Readiness) -> Arc<MockHandle> {
        let (sender, receiver) = watch::channel(readiness);
        Arc::new(MockHandle {
            identifier,
            sender: Mutex::new(Some(sender)),
            receiver,
            files: vec![FileRef {
                index: 0,
                relative_path: PathBuf::from("mock/movie.mp4"),
                length: 1000,
                downloaded: 0,
            }],
            handles: self.handles.clone(),
            destroy_calls: AtomicUsize::new(0),
            fail_destroy: AtomicBool::new(false),
        })
    }
}

impl TransferEngine for MockEngine {
    fn resolve(&self, identifier: &ContentId) -> Option<SharedHandle> {
        self.handles
            .lock()
            .get(identifier)
            .map(|handle| handle.clone() as SharedHandle)
    }

    fn acquire(
        &self,
        source: &ContentSource,
        _storage_dir: &Path,
    ) -> Result<SharedHandle, EngineError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);

        let behavior = self.behavior.lock().clone();
        let initial = match behavior {
            MockBehavior::Manual => Readiness::Pending,
            MockBehavior::Ready => Readiness::Ready,
            MockBehavior::Fail(reason) => Readiness::Failed { reason },
            MockBehavior::Reject => {
                return Err(EngineError::AcquireRejected {
                    identifier: source.identifier().clone(),
                    reason: "rejected by mock".to_string(),
                });
            }
        };

        let identifier = self
            .canonical
            .lock()
            .take()
            .unwrap_or_else(|| source.identifier().clone());
        let handle = self.build_handle(identifier.clone(), initial);
        self.handles.lock().insert(identifier, handle.clone());
        Ok(handle)
    }

    fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().clear();
    }
}
