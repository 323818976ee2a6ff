//! Registry of live sessions keyed by content identifier.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{Session, SessionError, SessionState};
use crate::config::SessionConfig;
use crate::engine::{Readiness, SharedHandle, TransferEngine};
use crate::identifier::{ContentId, ContentSource};

/// Result of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acquisition {
    /// Canonical identifier assigned by the engine
    pub identifier: ContentId,
    /// File index the caller asked for, passed through unchanged
    pub file_idx: usize,
}

/// How an acquire request proceeds after inspecting the registry.
enum Claim {
    /// Content is already ready under this identifier
    Ready(ContentId),
    /// Wait on an in-flight transfer
    Wait(SharedHandle),
}

/// Sessions keyed by identifier, plus requested identifiers the engine
/// re-keyed under a different canonical one.
#[derive(Default)]
struct Entries {
    sessions: HashMap<ContentId, Session>,
    aliases: HashMap<ContentId, ContentId>,
}

impl Entries {
    /// Maps a requested identifier to the key its session lives under.
    fn key_for(&self, identifier: &ContentId) -> ContentId {
        match self.aliases.get(identifier) {
            Some(canonical) if self.sessions.contains_key(canonical) => canonical.clone(),
            _ => identifier.clone(),
        }
    }

    /// Removes the entry for `identifier` if it still holds `handle`.
    fn discard(&mut self, identifier: &ContentId, handle: &SharedHandle) -> bool {
        let held = self
            .sessions
            .get(identifier)
            .is_some_and(|session| same_handle(session.handle(), handle));
        if held {
            self.sessions.remove(identifier);
            self.aliases
                .retain(|requested, canonical| canonical != identifier && requested != identifier);
        }
        held
    }
}

/// Owns the mapping from content identifier to engine handle.
///
/// Guarantees at most one in-flight engine acquisition per identifier: the
/// map is inspected and updated under a single lock, so concurrent callers
/// for the same content attach to the first caller's transfer.
pub struct SessionRegistry {
    engine: Arc<dyn TransferEngine>,
    config: SessionConfig,
    entries: Arc<Mutex<Entries>>,
    shut_down: AtomicBool,
}

impl SessionRegistry {
    /// Creates a registry and its storage root.
    ///
    /// # Errors
    /// - `SessionError::Storage` - Storage root could not be created
    pub fn new(engine: Arc<dyn TransferEngine>, config: SessionConfig) -> Result<Self, SessionError> {
        std::fs::create_dir_all(&config.storage_dir).map_err(|source| SessionError::Storage {
            path: config.storage_dir.clone(),
            source,
        })?;

        Ok(Self {
            engine,
            config,
            entries: Arc::new(Mutex::new(Entries::default())),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Storage root shared by all sessions.
    pub fn storage_root(&self) -> &Path {
        &self.config.storage_dir
    }

    /// Acquires content, or reuses an existing transfer for it.
    ///
    /// Waits until the engine reports metadata readiness. Concurrent calls for
    /// the same identifier share one engine transfer. A timeout only fails
    /// this caller; the transfer keeps running and later callers attach to it.
    ///
    /// # Errors
    /// - `SessionError::InvalidInput` - Input is not a magnet link or content hash
    /// - `SessionError::AcquisitionTimeout` - No readiness within the configured timeout
    /// - `SessionError::AcquisitionFailed` - Engine reported an error
    /// - `SessionError::InvalidHandle` - Engine handle can never become ready
    pub async fn acquire_or_reuse(
        &self,
        raw: &str,
        file_idx: usize,
    ) -> Result<Acquisition, SessionError> {
        let source = ContentSource::parse(raw)?;
        let requested = source.identifier().clone();
        debug!("Acquire requested for {} (file {})", requested, file_idx);

        let identifier = match self.claim(&source)? {
            Claim::Ready(identifier) => {
                debug!("Reusing ready session {}", identifier);
                identifier
            }
            Claim::Wait(handle) => self.await_readiness(&requested, handle).await?,
        };

        Ok(Acquisition {
            identifier,
            file_idx,
        })
    }

    /// Decides between reuse, attach and fresh acquisition under the lock.
    fn claim(&self, source: &ContentSource) -> Result<Claim, SessionError> {
        let identifier = source.identifier();
        let mut entries = self.entries.lock();
        let key = entries.key_for(identifier);

        if let Some(session) = entries.sessions.get(&key) {
            let handle = session.handle().clone();
            match session.state() {
                SessionState::Ready => {
                    return Ok(Claim::Ready(promote(
                        &mut entries,
                        identifier,
                        &handle,
                        self.storage_root(),
                    )));
                }
                SessionState::Acquiring => {
                    debug!("Attaching to in-flight acquisition of {}", key);
                    return Ok(Claim::Wait(handle));
                }
                SessionState::Failed => {
                    debug!("Discarding failed session {}", key);
                    entries.discard(&key, &handle);
                }
            }
        }

        if let Some(handle) = self.engine.resolve(identifier) {
            let readiness = handle.readiness().borrow().clone();
            match readiness {
                Readiness::Ready => {
                    return Ok(Claim::Ready(promote(
                        &mut entries,
                        identifier,
                        &handle,
                        self.storage_root(),
                    )));
                }
                Readiness::Pending => {
                    debug!("Engine already tracking {}, attaching", identifier);
                    entries.sessions.insert(
                        identifier.clone(),
                        Session::new(
                            identifier.clone(),
                            handle.clone(),
                            self.config.storage_dir.clone(),
                        ),
                    );
                    return Ok(Claim::Wait(handle));
                }
                Readiness::Failed { .. } => {
                    debug!("Engine holds a failed transfer for {}, restarting", identifier);
                }
            }
        }

        let handle = self
            .engine
            .acquire(source, &self.config.storage_dir)
            .map_err(|e| SessionError::AcquisitionFailed {
                identifier: identifier.clone(),
                reason: e.to_string(),
            })?;

        info!("Started acquisition of {}", identifier);
        entries.sessions.insert(
            identifier.clone(),
            Session::new(
                identifier.clone(),
                handle.clone(),
                self.config.storage_dir.clone(),
            ),
        );

        Ok(Claim::Wait(handle))
    }

    /// Waits for the handle to settle, bounded by the acquire timeout.
    async fn await_readiness(
        &self,
        requested: &ContentId,
        handle: SharedHandle,
    ) -> Result<ContentId, SessionError> {
        let timeout = self.config.acquire_timeout;
        let mut readiness = handle.readiness();

        let settled = match tokio::time::timeout(
            timeout,
            readiness.wait_for(|state| !state.is_pending()),
        )
        .await
        {
            Err(_) => {
                warn!(
                    "Timed out after {:?} waiting for metadata of {}; transfer continues",
                    timeout, requested
                );
                self.reap_on_failure(requested.clone(), handle.clone());
                return Err(SessionError::AcquisitionTimeout {
                    identifier: requested.clone(),
                    timeout,
                });
            }
            Ok(Err(_)) => {
                error!("Engine dropped readiness for {} before settling", requested);
                self.discard(requested, &handle);
                return Err(SessionError::InvalidHandle {
                    identifier: requested.clone(),
                });
            }
            Ok(Ok(state)) => state.clone(),
        };

        match settled {
            Readiness::Ready => {
                let mut entries = self.entries.lock();
                let identifier = promote(&mut entries, requested, &handle, self.storage_root());
                info!("Session {} ready", identifier);
                Ok(identifier)
            }
            Readiness::Failed { reason } => {
                error!("Acquisition of {} failed: {}", requested, reason);
                self.discard(requested, &handle);
                Err(SessionError::AcquisitionFailed {
                    identifier: requested.clone(),
                    reason,
                })
            }
            Readiness::Pending => Err(SessionError::InvalidHandle {
                identifier: requested.clone(),
            }),
        }
    }

    /// Drops the session once its transfer fails, for callers that stopped
    /// waiting on it.
    fn reap_on_failure(&self, identifier: ContentId, handle: SharedHandle) {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut readiness = handle.readiness();
            let failed = match readiness.wait_for(|state| !state.is_pending()).await {
                Ok(state) => !state.is_ready(),
                Err(_) => true,
            };
            if failed && entries.lock().discard(&identifier, &handle) {
                debug!("Dropped session {} after a late failure", identifier);
            }
        });
    }

    /// Finds the session for `identifier` in any lifecycle state.
    ///
    /// Falls back to the engine for transfers it tracks that were never
    /// registered here. Has no side effects.
    pub fn find(&self, identifier: &ContentId) -> Option<Session> {
        if let Some(session) = self.entries.lock().sessions.get(identifier) {
            return Some(session.clone());
        }

        self.engine.resolve(identifier).map(|handle| {
            Session::new(
                handle.identifier(),
                handle,
                self.config.storage_dir.clone(),
            )
        })
    }

    /// Returns the ready session for a raw identifier, if any.
    pub fn lookup(&self, raw: &str) -> Option<Session> {
        let identifier = ContentId::parse(raw).ok()?;

        let registered = self
            .entries
            .lock()
            .sessions
            .get(&identifier)
            .filter(|session| session.is_ready())
            .cloned();

        registered.or_else(|| {
            self.engine
                .resolve(&identifier)
                .filter(|handle| handle.readiness().borrow().is_ready())
                .map(|handle| Session::new(identifier, handle, self.config.storage_dir.clone()))
        })
    }

    /// Destroys the session for `raw`, releasing engine storage.
    ///
    /// Succeeds without touching the engine when nothing is registered. On
    /// failure the session stays registered so the call can be retried.
    ///
    /// # Errors
    /// - `SessionError::InvalidInput` - Input is not a content hash
    /// - `SessionError::DestroyFailed` - Engine could not tear down the transfer
    pub async fn destroy(&self, raw: &str) -> Result<(), SessionError> {
        let requested = ContentId::parse(raw)?;

        let (identifier, registered) = {
            let entries = self.entries.lock();
            let key = entries.key_for(&requested);
            let handle = entries.sessions.get(&key).map(|session| session.handle().clone());
            (key, handle)
        };
        let Some(handle) = registered.or_else(|| self.engine.resolve(&identifier)) else {
            debug!("Destroy of unknown session {} is a no-op", identifier);
            return Ok(());
        };

        handle
            .destroy()
            .await
            .map_err(|e| SessionError::DestroyFailed {
                identifier: identifier.clone(),
                reason: e.to_string(),
            })?;

        self.discard(&identifier, &handle);
        info!("Removed session {}", identifier);
        Ok(())
    }

    /// Number of registered sessions, in any state.
    pub fn len(&self) -> usize {
        self.entries.lock().sessions.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().sessions.is_empty()
    }

    /// Snapshot of registered sessions whose transfer has not failed.
    pub fn sessions(&self) -> Vec<Session> {
        self.entries
            .lock()
            .sessions
            .values()
            .filter(|session| session.state() != SessionState::Failed)
            .cloned()
            .collect()
    }

    /// Stops the engine and purges the storage root.
    ///
    /// Runs synchronously so it can be called from signal handlers and panic
    /// hooks. Only the first call has any effect.
    pub fn shutdown_all(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down engine and purging {}", self.storage_root().display());
        self.engine.shutdown();

        let dropped = {
            let mut entries = self.entries.lock();
            let count = entries.sessions.len();
            entries.sessions.clear();
            entries.aliases.clear();
            count
        };
        debug!("Dropped {} sessions", dropped);

        match std::fs::remove_dir_all(self.storage_root()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(
                "Failed to purge storage root {}: {}",
                self.storage_root().display(),
                e
            ),
        }
    }

    /// Returns true once `shutdown_all` has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn discard(&self, identifier: &ContentId, handle: &SharedHandle) {
        self.entries.lock().discard(identifier, handle);
    }
}

/// Registers `handle` as ready under the engine's canonical identifier.
///
/// A differing requested identifier is remembered as an alias so repeat
/// requests for it reach the same transfer.
fn promote(
    entries: &mut Entries,
    requested: &ContentId,
    handle: &SharedHandle,
    storage_root: &Path,
) -> ContentId {
    let canonical = handle.identifier();
    if &canonical != requested {
        if entries
            .sessions
            .get(requested)
            .is_some_and(|session| same_handle(session.handle(), handle))
        {
            debug!("Re-keying {} under canonical {}", requested, canonical);
            entries.sessions.remove(requested);
        }
        entries.aliases.insert(requested.clone(), canonical.clone());
    }

    entries.sessions.insert(
        canonical.clone(),
        Session::new(canonical.clone(), handle.clone(), storage_root.to_path_buf()),
    );
    canonical
}

fn same_handle(a: &SharedHandle, b: &SharedHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::engine::test_mocks::{MockBehavior, MockEngine};

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";
    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789ABCDEF0123456789ABCDEF01234567&dn=x";

    fn registry_with(behavior: MockBehavior) -> (Arc<SessionRegistry>, Arc<MockEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new(behavior));
        let config = SessionConfig {
            acquire_timeout: Duration::from_secs(30),
            storage_dir: dir.path().join("downloads"),
        };
        let registry = SessionRegistry::new(engine.clone(), config).unwrap();
        (Arc::new(registry), engine, dir)
    }

    fn id() -> ContentId {
        ContentId::parse(HASH).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_acquisition_becomes_ready() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);

        let acquisition = registry.acquire_or_reuse(MAGNET, 2).await.unwrap();

        assert_eq!(acquisition.identifier.as_str(), HASH);
        assert_eq!(acquisition.file_idx, 2);
        assert_eq!(engine.acquire_count(), 1);
        assert!(registry.lookup(HASH).is_some());
    }

    #[tokio::test]
    async fn test_ready_session_is_reused_without_new_acquire() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);

        registry.acquire_or_reuse(MAGNET, 0).await.unwrap();
        registry.acquire_or_reuse(HASH, 1).await.unwrap();

        assert_eq!(engine.acquire_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_acquisition() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);

        let waiters: Vec<_> = (0..8)
            .map(|idx| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.acquire_or_reuse(MAGNET, idx).await })
            })
            .collect();

        // Let every waiter register before settling
        while engine.handle(&id()).is_none() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.handle(&id()).unwrap().set_ready();

        for waiter in waiters {
            let acquisition = waiter.await.unwrap().unwrap();
            assert_eq!(acquisition.identifier, id());
        }
        assert_eq!(engine.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_engine_tracked_pending_handle_is_attached() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);
        let handle = engine.preload(id(), Readiness::Pending);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire_or_reuse(HASH, 0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_ready();

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(engine.acquire_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_tracked_ready_handle_returns_immediately() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);
        engine.preload(id(), Readiness::Ready);

        let acquisition = registry.acquire_or_reuse(HASH, 0).await.unwrap();

        assert_eq!(acquisition.identifier, id());
        assert_eq!(engine.acquire_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_caller_but_keeps_transfer() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);

        let result = registry.acquire_or_reuse(MAGNET, 0).await;
        assert!(matches!(
            result,
            Err(SessionError::AcquisitionTimeout { .. })
        ));

        // Late readiness is visible to later callers without a second acquire
        engine.handle(&id()).unwrap().set_ready();
        assert!(registry.lookup(HASH).is_some());
        registry.acquire_or_reuse(MAGNET, 0).await.unwrap();
        assert_eq!(engine.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_not_stored() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Fail("no peers".to_string()));

        let result = registry.acquire_or_reuse(MAGNET, 0).await;
        assert!(matches!(
            result,
            Err(SessionError::AcquisitionFailed { .. })
        ));
        assert!(registry.is_empty());

        engine.set_behavior(MockBehavior::Ready);
        registry.acquire_or_reuse(MAGNET, 0).await.unwrap();
        assert_eq!(engine.acquire_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_failure_after_timeout_restarts_acquisition() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);

        let _ = registry.acquire_or_reuse(MAGNET, 0).await;
        engine.handle(&id()).unwrap().fail("tracker unreachable");

        engine.set_behavior(MockBehavior::Ready);
        registry.acquire_or_reuse(MAGNET, 0).await.unwrap();
        assert_eq!(engine.acquire_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_acquire_is_a_failure() {
        let (registry, _engine, _dir) = registry_with(MockBehavior::Reject);

        let result = registry.acquire_or_reuse(HASH, 0).await;
        assert!(matches!(
            result,
            Err(SessionError::AcquisitionFailed { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_handle_is_invalid() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire_or_reuse(HASH, 0).await })
        };
        while engine.handle(&id()).is_none() {
            tokio::task::yield_now().await;
        }
        engine.handle(&id()).unwrap().abandon();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SessionError::InvalidHandle { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_never_reaches_engine() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);

        let result = registry.acquire_or_reuse("magnet:?dn=nothing", 0).await;
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
        assert!(result.unwrap_err().is_user_error());
        assert_eq!(engine.acquire_count(), 0);
    }

    #[tokio::test]
    async fn test_canonical_identifier_becomes_registry_key() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);
        let canonical = ContentId::parse("ffffffffffffffffffffffffffffffffffffffff").unwrap();
        engine.assign_canonical(canonical.clone());

        let acquisition = registry.acquire_or_reuse(HASH, 0).await.unwrap();

        assert_eq!(acquisition.identifier, canonical);
        assert!(registry.lookup(canonical.as_str()).is_some());
        assert!(registry.lookup(HASH).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_request_reaches_canonical_session() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);
        let canonical = ContentId::parse("ffffffffffffffffffffffffffffffffffffffff").unwrap();
        engine.assign_canonical(canonical.clone());

        let first = registry.acquire_or_reuse(HASH, 0).await.unwrap();
        let second = registry.acquire_or_reuse(MAGNET, 1).await.unwrap();

        assert_eq!(first.identifier, canonical);
        assert_eq!(second.identifier, canonical);
        assert_eq!(engine.acquire_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_through_requested_identifier_clears_alias() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);
        let canonical = ContentId::parse("ffffffffffffffffffffffffffffffffffffffff").unwrap();
        engine.assign_canonical(canonical.clone());
        registry.acquire_or_reuse(HASH, 0).await.unwrap();
        let handle = engine.handle(&canonical).unwrap();

        registry.destroy(HASH).await.unwrap();

        assert_eq!(handle.destroy_calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        let again = registry.acquire_or_reuse(HASH, 0).await.unwrap();
        assert_eq!(again.identifier, id());
        assert_eq!(engine.acquire_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_after_timeout_drops_session() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);

        let result = registry.acquire_or_reuse(MAGNET, 0).await;
        assert!(matches!(
            result,
            Err(SessionError::AcquisitionTimeout { .. })
        ));
        assert_eq!(registry.len(), 1);

        engine.handle(&id()).unwrap().fail("tracker unreachable");
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(registry.is_empty());
        assert!(registry.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_ignores_pending_sessions() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);
        engine.preload(id(), Readiness::Pending);

        assert!(registry.lookup(HASH).is_none());
        assert!(registry.find(&id()).is_some());
        assert!(registry.lookup("not-a-hash").is_none());
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_engine() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Manual);
        engine.preload(id(), Readiness::Ready);

        let session = registry.lookup(&HASH.to_uppercase()).unwrap();
        assert_eq!(session.identifier(), &id());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_unknown_is_noop() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);

        registry.destroy(HASH).await.unwrap();

        assert_eq!(engine.acquire_count(), 0);
        assert!(engine.handle(&id()).is_none());
    }

    #[tokio::test]
    async fn test_destroy_removes_session() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);
        registry.acquire_or_reuse(HASH, 0).await.unwrap();
        let handle = engine.handle(&id()).unwrap();

        registry.destroy(HASH).await.unwrap();

        assert_eq!(handle.destroy_calls.load(Ordering::SeqCst), 1);
        assert!(registry.lookup(HASH).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_session_for_retry() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);
        registry.acquire_or_reuse(HASH, 0).await.unwrap();
        let handle = engine.handle(&id()).unwrap();
        handle.fail_destroy.store(true, Ordering::SeqCst);

        let result = registry.destroy(HASH).await;
        assert!(matches!(result, Err(SessionError::DestroyFailed { .. })));
        assert!(registry.lookup(HASH).is_some());

        handle.fail_destroy.store(false, Ordering::SeqCst);
        registry.destroy(HASH).await.unwrap();
        assert!(registry.lookup(HASH).is_none());
        assert_eq!(handle.destroy_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_purges_storage_once() {
        let (registry, engine, _dir) = registry_with(MockBehavior::Ready);
        registry.acquire_or_reuse(HASH, 0).await.unwrap();
        std::fs::write(registry.storage_root().join("partial.bin"), b"data").unwrap();

        registry.shutdown_all();
        registry.shutdown_all();

        assert!(registry.is_shut_down());
        assert!(registry.is_empty());
        assert!(!registry.storage_root().exists());
        assert_eq!(engine.shutdown_calls.load(Ordering::SeqCst), 1);
    }
}
