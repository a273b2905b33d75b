//! The fetcher seam between the sync engine and concrete transports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use vulcan_core::error::AppError;
use vulcan_core::source::SourceKind;

/// A transport that can materialize and update local copies of one kind of
/// remote resource.
///
/// The sync engine owns the reconciliation policy (when to fetch, refresh,
/// or rebuild); implementations own the mechanics of a single fetch or
/// refresh and the vocabulary of their tool's failures.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// The rate-limit service key every call through this fetcher is
    /// charged against (e.g. "source-host").
    fn service(&self) -> &str;

    /// Materializes a fresh local copy of `identity` at `dest`.
    ///
    /// # Preconditions
    /// - `dest` does not exist (the engine guarantees this)
    ///
    /// # Postconditions
    /// - On success, `dest` exists and holds a complete copy
    ///
    /// # Errors
    /// - Network/timeout/command failures with diagnostic text; a failed
    ///   call may leave a partial `dest` behind, which the engine removes
    async fn fetch(&self, identity: &str, dest: &Path) -> Result<(), AppError>;

    /// Updates the existing local copy at `dest` in place.
    ///
    /// # Preconditions
    /// - `dest` exists and was produced by a prior `fetch`
    ///
    /// # Errors
    /// - Same classes as `fetch`; errors for which
    ///   [`is_recoverable_divergence`](Self::is_recoverable_divergence)
    ///   returns true make the engine rebuild from scratch
    async fn refresh(&self, identity: &str, dest: &Path) -> Result<(), AppError>;

    /// Classifies a refresh failure as reconcilable-only-by-rebuild.
    ///
    /// Transport-specific: git knows about divergent histories, plain HTTP
    /// transports have no such notion. The default says no failure is.
    fn is_recoverable_divergence(&self, _error: &AppError) -> bool {
        false
    }
}

/// Maps each source kind to the fetcher that handles it.
#[derive(Clone, Default)]
pub struct FetcherSet {
    fetchers: HashMap<SourceKind, Arc<dyn ResourceFetcher>>,
}

impl FetcherSet {
    /// Creates a new empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the fetcher for a kind, replacing any previous one.
    pub fn register(&mut self, kind: SourceKind, fetcher: Arc<dyn ResourceFetcher>) {
        self.fetchers.insert(kind, fetcher);
    }

    /// Builder-style registration.
    pub fn with(mut self, kind: SourceKind, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.register(kind, fetcher);
        self
    }

    /// Resolves the fetcher for a kind.
    pub fn for_kind(&self, kind: SourceKind) -> Option<&Arc<dyn ResourceFetcher>> {
        self.fetchers.get(&kind)
    }

    /// Returns true if a fetcher is registered for the kind.
    pub fn supports(&self, kind: SourceKind) -> bool {
        self.fetchers.contains_key(&kind)
    }
}
