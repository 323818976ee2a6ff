//! Simulated transfer engine.
//!
//! Serves catalog content without any network activity. Transfers follow
//! the catalog entry's behavior: ready after a delay, failing, stalled, or
//! settled by hand from tests. Download progress grows at the configured
//! speed once metadata is available and can be pinned per file.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use undertow_core::config::SimulationConfig;
use undertow_core::{
    ByteRange, ContentId, ContentSource, EngineError, FileRef, FileStream, Readiness,
    SharedHandle, TransferEngine, TransferHandle,
};

use crate::content::{ContentBehavior, FileSource, SimulatedContent, SimulatedFile, StreamFault};

/// Counters describing what the engine has been asked to do.
#[derive(Debug, Default)]
pub struct EngineCounters {
    acquires: AtomicUsize,
    destroys: AtomicUsize,
    streams_opened: AtomicUsize,
    streams_released: AtomicUsize,
}

impl EngineCounters {
    /// Number of `acquire` calls that started a transfer.
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Number of `destroy` calls on any handle.
    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    /// Number of byte streams opened.
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Number of byte streams whose read resources were released.
    pub fn streams_released(&self) -> usize {
        self.streams_released.load(Ordering::SeqCst)
    }
}

type TransferMap = Arc<Mutex<HashMap<ContentId, Arc<SimulatedTransfer>>>>;

/// In-process engine backed by a catalog of simulated content.
pub struct SimulatedEngine {
    config: SimulationConfig,
    catalog: Mutex<HashMap<ContentId, SimulatedContent>>,
    transfers: TransferMap,
    counters: Arc<EngineCounters>,
    fail_destroy: Arc<AtomicBool>,
    shut_down: AtomicBool,
}

impl SimulatedEngine {
    /// Creates an engine with an empty catalog.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            catalog: Mutex::new(HashMap::new()),
            transfers: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(EngineCounters::default()),
            fail_destroy: Arc::new(AtomicBool::new(false)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Adds content the simulated swarm can deliver.
    pub fn add_content(&self, content: SimulatedContent) {
        debug!(
            "Catalog entry {} ({} files)",
            content.identifier,
            content.files.len()
        );
        self.catalog
            .lock()
            .insert(content.identifier.clone(), content);
    }

    /// Call and resource counters.
    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// Makes subsequent `destroy` calls fail until cleared.
    pub fn set_fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Transfer tracked for `identifier`, for direct manipulation in tests.
    pub fn transfer(&self, identifier: &ContentId) -> Option<Arc<SimulatedTransfer>> {
        self.transfers.lock().get(identifier).cloned()
    }

    /// Registers a transfer as if it had been added earlier in this process.
    ///
    /// # Errors
    /// - `EngineError::AcquireRejected` - Identifier is not in the catalog
    pub fn preload(&self, identifier: &ContentId) -> Result<Arc<SimulatedTransfer>, EngineError> {
        let content = self.catalog.lock().get(identifier).cloned().ok_or_else(|| {
            EngineError::AcquireRejected {
                identifier: identifier.clone(),
                reason: "not in catalog".to_string(),
            }
        })?;
        Ok(self.start_transfer(content, PathBuf::new()))
    }

    fn start_transfer(&self, content: SimulatedContent, storage_dir: PathBuf) -> Arc<SimulatedTransfer> {
        let (sender, receiver) = watch::channel(Readiness::Pending);
        let transfer = Arc::new(SimulatedTransfer {
            content,
            storage_dir,
            config: self.config.clone(),
            sender: Mutex::new(Some(sender)),
            receiver,
            ready_at: Mutex::new(None),
            pinned_progress: Mutex::new(HashMap::new()),
            priorities: Mutex::new(Vec::new()),
            transfers: self.transfers.clone(),
            counters: self.counters.clone(),
            fail_destroy: self.fail_destroy.clone(),
        });

        self.transfers
            .lock()
            .insert(transfer.content.identifier.clone(), transfer.clone());
        schedule_readiness(&transfer, self.config.metadata_delay);
        transfer
    }
}

/// Applies the content behavior to a new transfer.
fn schedule_readiness(transfer: &Arc<SimulatedTransfer>, delay: std::time::Duration) {
    let outcome = match &transfer.content.behavior {
        ContentBehavior::Available => Readiness::Ready,
        ContentBehavior::Fails(reason) => Readiness::Failed {
            reason: reason.clone(),
        },
        ContentBehavior::Stalled | ContentBehavior::Manual => return,
    };

    if delay.is_zero() {
        transfer.settle(outcome);
        return;
    }

    let transfer = Arc::downgrade(transfer);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(transfer) = transfer.upgrade() {
            transfer.settle(outcome);
        }
    });
}

impl TransferEngine for SimulatedEngine {
    fn resolve(&self, identifier: &ContentId) -> Option<SharedHandle> {
        self.transfers
            .lock()
            .get(identifier)
            .map(|transfer| transfer.clone() as SharedHandle)
    }

    fn acquire(
        &self,
        source: &ContentSource,
        storage_dir: &Path,
    ) -> Result<SharedHandle, EngineError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::EngineShutdown);
        }

        self.counters.acquires.fetch_add(1, Ordering::SeqCst);
        let identifier = source.identifier();
        let content = self.catalog.lock().get(identifier).cloned().unwrap_or_else(|| {
            // Unknown content behaves like a torrent with no seeds
            SimulatedContent::new(identifier.clone(), identifier.to_string(), Vec::new())
                .with_behavior(ContentBehavior::Stalled)
        });

        info!("Simulated acquire of {} into {}", identifier, storage_dir.display());
        let transfer = self.start_transfer(content, storage_dir.to_path_buf());
        Ok(transfer as SharedHandle)
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let stopped = {
            let mut transfers = self.transfers.lock();
            let count = transfers.len();
            transfers.clear();
            count
        };
        info!("Simulated engine stopped {} transfers", stopped);
    }
}

/// One transfer inside the simulated engine.
pub struct SimulatedTransfer {
    content: SimulatedContent,
    storage_dir: PathBuf,
    config: SimulationConfig,
    sender: Mutex<Option<watch::Sender<Readiness>>>,
    receiver: watch::Receiver<Readiness>,
    ready_at: Mutex<Option<Instant>>,
    pinned_progress: Mutex<HashMap<usize, u64>>,
    priorities: Mutex<Vec<(usize, ByteRange)>>,
    transfers: TransferMap,
    counters: Arc<EngineCounters>,
    fail_destroy: Arc<AtomicBool>,
}

impl SimulatedTransfer {
    /// Reports metadata readiness.
    pub fn set_ready(&self) {
        self.settle(Readiness::Ready);
    }

    /// Reports a transfer failure.
    pub fn fail(&self, reason: &str) {
        self.settle(Readiness::Failed {
            reason: reason.to_string(),
        });
    }

    /// Pins the downloaded byte count of one file.
    pub fn set_downloaded(&self, index: usize, bytes: u64) {
        self.pinned_progress.lock().insert(index, bytes);
    }

    /// Priority windows requested so far, oldest first.
    pub fn priority_requests(&self) -> Vec<(usize, ByteRange)> {
        self.priorities.lock().clone()
    }

    fn settle(&self, readiness: Readiness) {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return;
        };
        if !sender.borrow().is_pending() {
            return;
        }
        if readiness.is_ready() {
            *self.ready_at.lock() = Some(Instant::now());
        }
        sender.send_replace(readiness);
    }

    fn downloaded(&self, index: usize, length: u64) -> u64 {
        if let Some(pinned) = self.pinned_progress.lock().get(&index) {
            return (*pinned).min(length);
        }
        let Some(ready_at) = *self.ready_at.lock() else {
            return 0;
        };
        if self.config.download_speed == u64::MAX {
            return length;
        }
        let elapsed_ms = ready_at.elapsed().as_millis() as u64;
        self.config
            .download_speed
            .saturating_mul(elapsed_ms)
            .checked_div(1000)
            .unwrap_or(0)
            .min(length)
    }

    fn file_ref(&self, index: usize, file: &SimulatedFile) -> FileRef {
        let length = file.source.length();
        FileRef {
            index,
            relative_path: file.relative_path.clone(),
            length,
            downloaded: self.downloaded(index, length),
        }
    }
}

#[async_trait]
impl TransferHandle for SimulatedTransfer {
    fn identifier(&self) -> ContentId {
        self.content.identifier.clone()
    }

    fn readiness(&self) -> watch::Receiver<Readiness> {
        self.receiver.clone()
    }

    fn name(&self) -> Option<String> {
        self.receiver
            .borrow()
            .is_ready()
            .then(|| self.content.name.clone())
    }

    fn files(&self) -> Vec<FileRef> {
        if !self.receiver.borrow().is_ready() {
            return Vec::new();
        }
        self.content
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| self.file_ref(index, file))
            .collect()
    }

    fn open_stream(
        &self,
        index: usize,
        range: Option<ByteRange>,
    ) -> Result<FileStream, EngineError> {
        let file = self
            .receiver
            .borrow()
            .is_ready()
            .then(|| self.content.files.get(index))
            .flatten()
            .ok_or_else(|| EngineError::FileNotFound {
                identifier: self.content.identifier.clone(),
                index,
            })?;

        let Some(range) = range.or_else(|| ByteRange::whole(file.source.length())) else {
            return Ok(self.counted(FileStream::empty()));
        };

        debug!(
            "Opening stream {}[{}] bytes {}-{}",
            self.content.identifier.short(),
            index,
            range.start,
            range.end
        );

        let chunk_size = self.config.chunk_size.max(1);
        let stream = match &file.source {
            FileSource::Memory(data) => FileStream::new(memory_stream(
                data.clone(),
                range,
                chunk_size,
                file.fault,
            )),
            FileSource::Disk { path, .. } => {
                FileStream::new(disk_stream(path.clone(), range, chunk_size, file.fault))
            }
        };
        Ok(self.counted(stream))
    }

    fn prioritize(&self, index: usize, range: ByteRange) -> Result<(), EngineError> {
        if index >= self.content.files.len() {
            return Err(EngineError::FileNotFound {
                identifier: self.content.identifier.clone(),
                index,
            });
        }
        debug!(
            "Prioritizing {}[{}] bytes {}-{}",
            self.content.identifier.short(),
            index,
            range.start,
            range.end
        );
        self.priorities.lock().push((index, range));
        Ok(())
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        self.counters.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(EngineError::TeardownFailed {
                identifier: self.content.identifier.clone(),
                reason: "simulated teardown failure".to_string(),
            });
        }

        self.transfers.lock().remove(&self.content.identifier);
        self.sender.lock().take();

        let content_dir = self.storage_dir.join(&self.content.name);
        if !self.storage_dir.as_os_str().is_empty() {
            match tokio::fs::remove_dir_all(&content_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", content_dir.display(), e),
            }
        }
        Ok(())
    }
}

impl SimulatedTransfer {
    fn counted(&self, stream: FileStream) -> FileStream {
        self.counters.streams_opened.fetch_add(1, Ordering::SeqCst);
        let counters = self.counters.clone();
        stream.with_release_hook(move || {
            counters.streams_released.fetch_add(1, Ordering::SeqCst);
        })
    }
}

fn injected_error(fault: StreamFault) -> io::Error {
    io::Error::new(fault.kind, "simulated stream fault")
}

fn memory_stream(
    data: Bytes,
    range: ByteRange,
    chunk_size: usize,
    fault: Option<StreamFault>,
) -> impl futures::Stream<Item = io::Result<Bytes>> + Send + 'static {
    let end = (range.end as usize + 1).min(data.len());
    let start = (range.start as usize).min(end);
    let slice = data.slice(start..end);

    let mut chunks: Vec<io::Result<Bytes>> = (0..slice.len())
        .step_by(chunk_size)
        .map(|offset| Ok(slice.slice(offset..(offset + chunk_size).min(slice.len()))))
        .collect();

    if let Some(fault) = fault {
        chunks.truncate(fault.after_chunks);
        chunks.push(Err(injected_error(fault)));
    }

    stream::iter(chunks)
}

struct DiskRead {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    position: u64,
    remaining: u64,
    chunk_size: usize,
    chunks_sent: usize,
    fault: Option<StreamFault>,
}

fn disk_stream(
    path: PathBuf,
    range: ByteRange,
    chunk_size: usize,
    fault: Option<StreamFault>,
) -> impl futures::Stream<Item = io::Result<Bytes>> + Send + 'static {
    let state = DiskRead {
        path,
        file: None,
        position: range.start,
        remaining: range.len(),
        chunk_size,
        chunks_sent: 0,
        fault,
    };

    stream::unfold(state, |mut state| async move {
        if state.remaining == 0 {
            return None;
        }

        if let Some(fault) = state.fault
            && state.chunks_sent >= fault.after_chunks
        {
            state.remaining = 0;
            return Some((Err(injected_error(fault)), state));
        }

        if state.file.is_none() {
            let opened = async {
                let mut file = tokio::fs::File::open(&state.path).await?;
                file.seek(io::SeekFrom::Start(state.position)).await?;
                Ok::<_, io::Error>(file)
            }
            .await;
            match opened {
                Ok(file) => state.file = Some(file),
                Err(e) => {
                    state.remaining = 0;
                    return Some((Err(e), state));
                }
            }
        }

        let want = state.remaining.min(state.chunk_size as u64) as usize;
        let mut buffer = vec![0u8; want];
        let read = match state.file.as_mut() {
            Some(file) => file.read(&mut buffer).await,
            None => Ok(0),
        };

        match read {
            Ok(0) => {
                state.remaining = 0;
                Some((
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shorter than advertised length",
                    )),
                    state,
                ))
            }
            Ok(n) => {
                buffer.truncate(n);
                state.position += n as u64;
                state.remaining -= n as u64;
                state.chunks_sent += 1;
                Some((Ok(Bytes::from(buffer)), state))
            }
            Err(e) => {
                state.remaining = 0;
                Some((Err(e), state))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    const HASH: &str = "abcdefabcdefabcdefabcdefabcdefabcdefabcd";

    fn id() -> ContentId {
        ContentId::parse(HASH).unwrap()
    }

    fn engine_with(content: SimulatedContent) -> SimulatedEngine {
        let engine = SimulatedEngine::new(SimulationConfig::instant());
        engine.add_content(content);
        engine
    }

    fn movie(data: &'static [u8]) -> SimulatedContent {
        SimulatedContent::new(
            id(),
            "Movie",
            vec![SimulatedFile::in_memory("Movie/movie.mp4", data)],
        )
    }

    async fn collect(mut stream: FileStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_available_content_is_ready_immediately() {
        let engine = engine_with(movie(b"0123456789"));
        let source = ContentSource::parse(HASH).unwrap();

        let handle = engine.acquire(&source, Path::new("/tmp/unused")).unwrap();

        assert!(handle.readiness().borrow().is_ready());
        assert_eq!(handle.files().len(), 1);
        assert_eq!(handle.files()[0].length, 10);
        assert_eq!(engine.counters().acquires(), 1);
        assert!(engine.resolve(&id()).is_some());
    }

    #[tokio::test]
    async fn test_unknown_content_stalls() {
        let engine = SimulatedEngine::new(SimulationConfig::instant());
        let source = ContentSource::parse(HASH).unwrap();

        let handle = engine.acquire(&source, Path::new("/tmp/unused")).unwrap();

        assert!(handle.readiness().borrow().is_pending());
        assert!(handle.files().is_empty());
    }

    #[tokio::test]
    async fn test_ranged_memory_stream() {
        let engine = engine_with(movie(b"0123456789"));
        let transfer = engine.preload(&id()).unwrap();

        let stream = transfer
            .open_stream(0, Some(ByteRange::new(2, 5)))
            .unwrap();

        assert_eq!(collect(stream).await, b"2345");
        assert_eq!(engine.counters().streams_opened(), 1);
        assert_eq!(engine.counters().streams_released(), 1);
    }

    #[tokio::test]
    async fn test_disk_stream_reads_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mkv");
        std::fs::write(&path, b"abcdefghijklmnopqrstuvwxyz").unwrap();

        let engine = engine_with(SimulatedContent::new(
            id(),
            "Clip",
            vec![SimulatedFile::on_disk("clip.mkv", path, 26)],
        ));
        let transfer = engine.preload(&id()).unwrap();

        let stream = transfer
            .open_stream(0, Some(ByteRange::new(20, 25)))
            .unwrap();
        assert_eq!(collect(stream).await, b"uvwxyz");

        let whole = transfer.open_stream(0, None).unwrap();
        assert_eq!(collect(whole).await.len(), 26);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let content = SimulatedContent::new(
            id(),
            "Movie",
            vec![
                SimulatedFile::in_memory("movie.mp4", &b"0123456789012345678901234567890123"[..])
                    .with_fault(1, io::ErrorKind::Other),
            ],
        );
        let engine = engine_with(content);
        let transfer = engine.preload(&id()).unwrap();

        let mut stream = transfer.open_stream(0, None).unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_prioritize_records_window() {
        let engine = engine_with(movie(b"0123456789"));
        let transfer = engine.preload(&id()).unwrap();

        transfer.prioritize(0, ByteRange::new(5, 9)).unwrap();
        let missing = transfer.prioritize(3, ByteRange::new(0, 1));

        assert!(matches!(missing, Err(EngineError::FileNotFound { index: 3, .. })));
        assert_eq!(transfer.priority_requests(), vec![(0, ByteRange::new(5, 9))]);
    }

    #[tokio::test]
    async fn test_pinned_progress() {
        let engine = engine_with(movie(b"0123456789"));
        let transfer = engine.preload(&id()).unwrap();

        transfer.set_downloaded(0, 4);
        assert_eq!(transfer.files()[0].downloaded, 4);

        transfer.set_downloaded(0, 400);
        assert_eq!(transfer.files()[0].downloaded, 10);
    }

    #[tokio::test]
    async fn test_manual_content_settles_once() {
        let engine = engine_with(movie(b"0").with_behavior(ContentBehavior::Manual));
        let transfer = engine.preload(&id()).unwrap();
        assert!(transfer.readiness().borrow().is_pending());

        transfer.fail("tracker down");
        transfer.set_ready();

        assert!(transfer.readiness().borrow().is_failed());
    }

    #[tokio::test]
    async fn test_destroy_and_shutdown() {
        let engine = engine_with(movie(b"0"));
        let transfer = engine.preload(&id()).unwrap();

        engine.set_fail_destroy(true);
        assert!(transfer.destroy().await.is_err());
        assert!(engine.resolve(&id()).is_some());

        engine.set_fail_destroy(false);
        transfer.destroy().await.unwrap();
        assert!(engine.resolve(&id()).is_none());
        assert_eq!(engine.counters().destroys(), 2);

        engine.shutdown();
        let source = ContentSource::parse(HASH).unwrap();
        assert!(matches!(
            engine.acquire(&source, Path::new("/tmp")),
            Err(EngineError::EngineShutdown)
        ));
    }
}
