//! Resource synchronization engine.
//!
//! Decides per resource whether to fetch a fresh copy or refresh the
//! existing one, routes every remote call through the rate limiter and the
//! retry policy, and resolves each resource to a [`SyncOutcome`]. Errors
//! never escape [`SyncEngine::sync`]: one bad resource must not take down a
//! batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use vulcan_client::ResourceFetcher;
use vulcan_core::error::AppError;
use vulcan_core::source::ResourceDescriptor;
use vulcan_core::summary::SyncOutcome;

use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;

/// Removes `path` whether it is a file or a directory, logging instead of
/// failing. A path that is already gone is fine.
fn remove_path_quiet(path: &Path) {
    let result = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(err) = result {
        warn!("Failed to remove partial output at {}: {}", path.display(), err);
    }
}

/// Removes partially written output when dropped, unless disarmed.
///
/// Armed immediately before a fetch starts so failed and cancelled attempts
/// leave nothing behind for the next attempt to trip over.
struct PartialCleanup<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialCleanup<'a> {
    fn arm(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialCleanup<'_> {
    fn drop(&mut self) {
        if self.armed {
            remove_path_quiet(self.path);
        }
    }
}

/// Sibling staging path used while rebuilding a diverged copy.
fn rebuild_staging_path(path: &Path) -> Result<PathBuf, AppError> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        AppError::Configuration(format!("resource path has no file name: {}", path.display()))
    })?;
    Ok(path.with_file_name(format!(".{name}.rebuild")))
}

/// Replaces `path` with the fully built `staging` copy.
///
/// Synchronous on purpose: there is no await point between deleting the old
/// copy and moving the replacement in, so cancellation cannot interleave.
fn swap_into_place(path: &Path, staging: &Path) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
        Ok(_) => std::fs::remove_file(path)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    std::fs::rename(staging, path)
}

/// Fetches and refreshes local copies of remote resources.
///
/// Calls on the same destination path are serialized; calls on different
/// paths proceed independently. Remote traffic goes through the shared
/// [`RateLimiter`] and transient failures are retried per [`RetryPolicy`].
pub struct SyncEngine {
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl SyncEngine {
    pub fn new(limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            limiter,
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn path_lock(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Synchronizes one resource and resolves it to an outcome.
    ///
    /// A missing local copy is fetched fresh; an existing one is refreshed
    /// in place. A refresh failure that the fetcher classifies as a
    /// recoverable divergence triggers a rebuild: the replacement is fetched
    /// into a staging path next to the resource and only swapped in once it
    /// is complete, so the old copy survives any rebuild failure. A
    /// successful rebuild counts as a fresh fetch, not a refresh. All other
    /// failures leave the local copy untouched.
    ///
    /// This method never returns an error. Every failure, including an
    /// invalid descriptor, resolves to a failed outcome carrying the error.
    pub async fn sync(
        &self,
        descriptor: &ResourceDescriptor,
        fetcher: &dyn ResourceFetcher,
    ) -> SyncOutcome {
        if let Err(err) = descriptor.validate() {
            warn!("Skipping invalid resource descriptor: {}", err);
            return SyncOutcome::failure(descriptor.clone(), err.to_string());
        }

        let _serial = self.path_lock(&descriptor.local_path).lock_owned().await;
        let path = descriptor.local_path.as_path();

        let present = match tokio::fs::try_exists(path).await {
            Ok(present) => present,
            Err(err) => {
                warn!("Cannot probe local copy of {}: {}", descriptor.name, err);
                return SyncOutcome::failure(
                    descriptor.clone(),
                    AppError::Filesystem(err).to_string(),
                );
            }
        };

        if !present {
            info!("Fetching {} (no local copy)", descriptor.name);
            match self.fetch_into(fetcher, &descriptor.identity, path).await {
                Ok(()) => SyncOutcome::fetched(descriptor.clone()),
                Err(err) => {
                    warn!("Fetch of {} failed: {}", descriptor.name, err);
                    SyncOutcome::failure(descriptor.clone(), err.to_string())
                }
            }
        } else {
            debug!("Refreshing {} in place", descriptor.name);
            match self.refresh_in_place(fetcher, &descriptor.identity, path).await {
                Ok(()) => SyncOutcome::refreshed(descriptor.clone()),
                Err(err) if fetcher.is_recoverable_divergence(&err) => {
                    warn!(
                        "Local copy of {} diverged from its origin, rebuilding: {}",
                        descriptor.name, err
                    );
                    match self.rebuild(fetcher, &descriptor.identity, path).await {
                        Ok(()) => SyncOutcome::fetched(descriptor.clone()),
                        Err(err) => {
                            warn!("Rebuild of {} failed: {}", descriptor.name, err);
                            SyncOutcome::failure(descriptor.clone(), err.to_string())
                        }
                    }
                }
                Err(err) => {
                    warn!("Refresh of {} failed: {}", descriptor.name, err);
                    SyncOutcome::failure(descriptor.clone(), err.to_string())
                }
            }
        }
    }

    /// Rate-limited, retried fetch into `dest`. Partial output from a failed
    /// or cancelled attempt is removed before the next attempt runs.
    async fn fetch_into(
        &self,
        fetcher: &dyn ResourceFetcher,
        identity: &str,
        dest: &Path,
    ) -> Result<(), AppError> {
        self.retry
            .run(|| async {
                let mut cleanup = PartialCleanup::arm(dest);
                let result = self
                    .limiter
                    .run(fetcher.service(), || fetcher.fetch(identity, dest))
                    .await;
                if result.is_ok() {
                    cleanup.disarm();
                }
                result
            })
            .await
    }

    /// Rate-limited, retried in-place refresh of `dest`.
    async fn refresh_in_place(
        &self,
        fetcher: &dyn ResourceFetcher,
        identity: &str,
        dest: &Path,
    ) -> Result<(), AppError> {
        self.retry
            .run(|| {
                self.limiter
                    .run(fetcher.service(), || fetcher.refresh(identity, dest))
            })
            .await
    }

    /// Fetches a replacement into a staging path and swaps it in. The
    /// existing copy is deleted only once the replacement is complete.
    async fn rebuild(
        &self,
        fetcher: &dyn ResourceFetcher,
        identity: &str,
        path: &Path,
    ) -> Result<(), AppError> {
        let staging = rebuild_staging_path(path)?;
        // A stale staging copy from an interrupted earlier rebuild would
        // make the fetch fail.
        remove_path_quiet(&staging);

        self.fetch_into(fetcher, identity, &staging).await?;

        swap_into_place(path, &staging).map_err(|err| {
            remove_path_quiet(&staging);
            AppError::Filesystem(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use vulcan_core::source::{Priority, SourceKind};
    use vulcan_core::summary::SyncStatus;

    /// Scripted fetcher: the first `fetch_failures` fetch calls write a
    /// partial marker and fail; later calls write `payload`. Refresh fails
    /// with the scripted error once, then rewrites the payload.
    struct MockFetcher {
        payload: String,
        fetch_failures: u32,
        fetch_error: fn() -> AppError,
        refresh_error: Mutex<Option<AppError>>,
        divergence_recoverable: bool,
        fetch_delay: Duration,
        fetch_calls: AtomicU32,
        refresh_calls: AtomicU32,
    }

    impl MockFetcher {
        fn new(payload: &str) -> Self {
            Self {
                payload: payload.to_string(),
                fetch_failures: 0,
                fetch_error: || AppError::Network("connection reset".to_string()),
                refresh_error: Mutex::new(None),
                divergence_recoverable: false,
                fetch_delay: Duration::ZERO,
                fetch_calls: AtomicU32::new(0),
                refresh_calls: AtomicU32::new(0),
            }
        }

        fn failing_first(mut self, failures: u32) -> Self {
            self.fetch_failures = failures;
            self
        }

        fn with_fetch_error(mut self, error: fn() -> AppError) -> Self {
            self.fetch_error = error;
            self
        }

        fn with_refresh_error(mut self, error: AppError) -> Self {
            self.refresh_error = Mutex::new(Some(error));
            self
        }

        fn recoverable(mut self) -> Self {
            self.divergence_recoverable = true;
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.fetch_delay = delay;
            self
        }

        fn write_payload(&self, dest: &Path) -> std::io::Result<()> {
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("data.txt"), &self.payload)
        }
    }

    #[async_trait]
    impl ResourceFetcher for MockFetcher {
        fn service(&self) -> &str {
            "mock"
        }

        async fn fetch(&self, _identity: &str, dest: &Path) -> Result<(), AppError> {
            let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            if call < self.fetch_failures {
                // Leave half-written output behind, like an interrupted
                // download would.
                std::fs::create_dir_all(dest).map_err(AppError::Filesystem)?;
                std::fs::write(dest.join("partial.tmp"), b"junk").map_err(AppError::Filesystem)?;
                return Err((self.fetch_error)());
            }
            self.write_payload(dest).map_err(AppError::Filesystem)
        }

        async fn refresh(&self, _identity: &str, dest: &Path) -> Result<(), AppError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .refresh_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(err) = scripted {
                return Err(err);
            }
            self.write_payload(dest).map_err(AppError::Filesystem)
        }

        fn is_recoverable_divergence(&self, error: &AppError) -> bool {
            self.divergence_recoverable && matches!(error, AppError::CommandFailed(_))
        }
    }

    fn descriptor(dir: &TempDir, name: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            name: name.to_string(),
            identity: format!("https://example.com/{name}.git"),
            local_path: dir.path().join(name),
            kind: SourceKind::Repository,
            category: "vulnerabilities".to_string(),
            priority: Priority::High,
        }
    }

    fn engine() -> SyncEngine {
        let retry = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5));
        SyncEngine::new(Arc::new(RateLimiter::new(HashMap::new())), retry)
    }

    fn read_payload(descriptor: &ResourceDescriptor) -> String {
        std::fs::read_to_string(descriptor.local_path.join("data.txt")).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_absent_resource_is_fetched() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("contracts");

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Fetched);
        assert!(outcome.error.is_none());
        assert_eq!(read_payload(&desc), "contracts");
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_present_resource_is_refreshed_in_place() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("fresh");
        fetcher.write_payload(&desc.local_path).expect("seed");

        let engine = engine();
        let first = engine.sync(&desc, &fetcher).await;
        let second = engine.sync(&desc, &fetcher).await;

        assert_eq!(first.status, SyncStatus::Refreshed);
        assert_eq!(second.status, SyncStatus::Refreshed);
        assert!(desc.local_path.exists());
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_divergent_refresh_rebuilds_from_scratch() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("rebuilt")
            .with_refresh_error(AppError::CommandFailed(
                "fatal: Not possible to fast-forward, aborting.".to_string(),
            ))
            .recoverable();

        std::fs::create_dir_all(&desc.local_path).expect("seed dir");
        std::fs::write(desc.local_path.join("data.txt"), "stale").expect("seed file");
        std::fs::write(desc.local_path.join("legacy.txt"), "old junk").expect("seed extra");

        let outcome = engine().sync(&desc, &fetcher).await;

        // A rebuilt copy is a fresh fetch, and carries nothing over from
        // the replaced one.
        assert_eq!(outcome.status, SyncStatus::Fetched);
        assert_eq!(read_payload(&desc), "rebuilt");
        assert!(!desc.local_path.join("legacy.txt").exists());
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 1);
        // No staging leftover next to the resource.
        assert!(!dir.path().join(".smartbugs.rebuild").exists());
    }

    #[tokio::test]
    async fn test_unrecoverable_refresh_failure_leaves_local_copy_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("fresh")
            .with_refresh_error(AppError::CommandFailed("fatal: repository corrupt".to_string()));

        std::fs::create_dir_all(&desc.local_path).expect("seed dir");
        std::fs::write(desc.local_path.join("data.txt"), "original").expect("seed file");

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Failed);
        assert!(outcome.error.is_some());
        assert_eq!(read_payload(&desc), "original");
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_removes_partial_output() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("unused")
            .failing_first(u32::MAX)
            .with_fetch_error(|| AppError::CommandFailed("fatal: early EOF".to_string()));

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Failed);
        assert!(!desc.local_path.exists());
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried_to_success() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("contracts").failing_first(1);

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Fetched);
        assert_eq!(read_payload(&desc), "contracts");
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 2);
        // The retried attempt must not see the first attempt's leftovers.
        assert!(!desc.local_path.join("partial.tmp").exists());
    }

    #[tokio::test]
    async fn test_non_retryable_fetch_failure_is_not_retried() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = MockFetcher::new("unused")
            .failing_first(u32::MAX)
            .with_fetch_error(|| AppError::CommandFailed("fatal: bad object HEAD".to_string()));

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Failed);
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_fails_without_touching_fetcher() {
        let dir = TempDir::new().expect("tempdir");
        let mut desc = descriptor(&dir, "smartbugs");
        desc.identity = String::new();
        let fetcher = MockFetcher::new("unused");

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Failed);
        assert!(matches!(outcome.error, Some(ref msg) if msg.contains("identity")));
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreadable_probe_resolves_to_failure() {
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not dir").expect("seed");

        let mut desc = descriptor(&dir, "smartbugs");
        // A path component that is a regular file makes the existence probe
        // error out rather than report absence.
        desc.local_path = blocker.join("nested");
        let fetcher = MockFetcher::new("unused");

        let outcome = engine().sync(&desc, &fetcher).await;

        assert_eq!(outcome.status, SyncStatus::Failed);
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_same_path_syncs_are_serialized() {
        let dir = TempDir::new().expect("tempdir");
        let desc = descriptor(&dir, "smartbugs");
        let fetcher = Arc::new(MockFetcher::new("contracts").slow(Duration::from_millis(30)));
        let engine = Arc::new(engine());

        let run = |engine: Arc<SyncEngine>, fetcher: Arc<MockFetcher>, desc: ResourceDescriptor| async move {
            engine.sync(&desc, fetcher.as_ref()).await
        };

        let (first, second) = tokio::join!(
            run(Arc::clone(&engine), Arc::clone(&fetcher), desc.clone()),
            run(Arc::clone(&engine), Arc::clone(&fetcher), desc.clone())
        );

        // Serialization means the loser of the race sees the winner's copy
        // and refreshes instead of fetching again.
        let statuses = [first.status, second.status];
        assert!(statuses.contains(&SyncStatus::Fetched));
        assert!(statuses.contains(&SyncStatus::Refreshed));
        assert_eq!(fetcher.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebuild_staging_path_is_hidden_sibling() {
        let staging = rebuild_staging_path(Path::new("/data/repos/smartbugs")).expect("staging");
        assert_eq!(staging, PathBuf::from("/data/repos/.smartbugs.rebuild"));
    }

    #[test]
    fn test_swap_into_place_replaces_directory() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("repo");
        let staging = dir.path().join(".repo.rebuild");

        std::fs::create_dir_all(&target).expect("target");
        std::fs::write(target.join("data.txt"), "old").expect("old");
        std::fs::create_dir_all(&staging).expect("staging");
        std::fs::write(staging.join("data.txt"), "new").expect("new");

        swap_into_place(&target, &staging).expect("swap");

        let content = std::fs::read_to_string(target.join("data.txt")).expect("read");
        assert_eq!(content, "new");
        assert!(!staging.exists());
    }

    #[test]
    fn test_swap_into_place_works_without_existing_target() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("repo");
        let staging = dir.path().join(".repo.rebuild");

        std::fs::create_dir_all(&staging).expect("staging");
        std::fs::write(staging.join("data.txt"), "new").expect("new");

        swap_into_place(&target, &staging).expect("swap");
        assert!(target.join("data.txt").exists());
    }
}
