//! In-memory reference backend.
//!
//! [`MemoryBackend`] keeps a [`MemoryRepository`] behind a lock and hands
//! out [`MemorySession`]s that implement the full session contract. It is
//! used by the test suites and by the CLI, which loads and saves
//! repositories as JSON snapshots.

mod repository;
mod session;

pub use repository::MemoryRepository;
pub use session::MemorySession;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CoreResult;
use crate::manager::StoreManager;

/// Configuration for the in-memory backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryConfig {
    /// Reported by `is_db_store` for every store.
    pub db_store: bool,
}

impl MemoryConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self { db_store: false }
    }

    /// Sets the database-store hint.
    #[must_use]
    pub const fn db_store(mut self, db_store: bool) -> Self {
        self.db_store = db_store;
        self
    }
}

pub(crate) struct BackendInner {
    pub(crate) repo: RwLock<MemoryRepository>,
    pub(crate) manager: StoreManager,
    pub(crate) config: MemoryConfig,
    writes: AtomicU64,
}

impl BackendInner {
    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared handle to an in-memory repository and its store manager.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<BackendInner>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self::from_repository(MemoryRepository::new(), config)
    }

    /// Creates a backend over an existing repository.
    #[must_use]
    pub fn from_repository(repo: MemoryRepository, config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                repo: RwLock::new(repo),
                manager: StoreManager::new(),
                config,
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Loads a backend from a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Fails for malformed snapshots.
    pub fn from_json(json: &str, config: MemoryConfig) -> CoreResult<Self> {
        Ok(Self::from_repository(MemoryRepository::from_json(json)?, config))
    }

    /// Opens a session for `user_id`.
    #[must_use]
    pub fn session(&self, user_id: &str) -> MemorySession {
        let session_id = self.inner.manager.create_session(user_id);
        MemorySession::new(Arc::clone(&self.inner), session_id, user_id.to_string())
    }

    /// The store manager shared by all sessions of this backend.
    #[must_use]
    pub fn manager(&self) -> &StoreManager {
        &self.inner.manager
    }

    /// Copy of the committed repository state.
    #[must_use]
    pub fn snapshot(&self) -> MemoryRepository {
        self.inner.repo.read().clone()
    }

    /// Committed repository state as JSON.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn to_json(&self) -> CoreResult<String> {
        self.inner.repo.read().to_json()
    }

    /// Number of mutating calls made through any session.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MemoryConfig::default();
        assert!(!config.db_store);
        assert!(MemoryConfig::new().db_store(true).db_store);
    }

    #[test]
    fn sessions_are_registered() {
        let backend = MemoryBackend::default();
        let _a = backend.session("alice");
        let _b = backend.session("bob");
        assert_eq!(backend.manager().session_count(), 2);
        drop(_a);
        assert_eq!(backend.manager().session_count(), 1);
    }
}
