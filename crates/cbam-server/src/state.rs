//! Application state with a shared `EmissionService` for concurrent access.
//!
//! [`AppState`] wraps the service in `Arc<tokio::sync::Mutex<>>` for use with
//! axum handlers. `tokio::sync::Mutex` lets handlers await the lock without
//! blocking the runtime, and its owned guard can be moved into
//! `spawn_blocking` for long recalculations.
//!
//! The service mutex only serializes access to the SQLite connection. Run
//! exclusivity, including across processes sharing the handle, is the job
//! of [`GraphLockManager`].

use std::sync::Arc;
use std::time::Duration;

use cbam_storage::SqliteStore;

use crate::concurrency::GraphLockManager;
use crate::error::ApiError;
use crate::service::EmissionService;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// The shared recalculation coordinator.
    pub service: Arc<tokio::sync::Mutex<EmissionService<SqliteStore>>>,
    /// Per-graph run lock.
    pub lock_manager: Arc<GraphLockManager>,
}

impl AppState {
    /// Creates a new `AppState` backed by the SQLite database at `db_path`.
    pub fn new(db_path: &str, lock_ttl: Duration) -> Result<Self, ApiError> {
        let service = EmissionService::new(db_path)?;
        Ok(Self::from_parts(service, lock_ttl))
    }

    /// Creates a new `AppState` with an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ApiError> {
        let service = EmissionService::in_memory()?;
        Ok(Self::from_parts(service, Duration::from_secs(300)))
    }

    fn from_parts(service: EmissionService<SqliteStore>, lock_ttl: Duration) -> Self {
        let lock_manager = Arc::new(GraphLockManager::new(lock_ttl));

        // Start the lock expiry sweep task (every 60 seconds)
        lock_manager.start_expiry_sweep(Duration::from_secs(60));

        AppState {
            service: Arc::new(tokio::sync::Mutex::new(service)),
            lock_manager,
        }
    }
}
