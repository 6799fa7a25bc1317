//! Per-graph advisory lock for propagation runs.
//!
//! [`GraphLockManager`] lets at most one run write to a graph at a time.
//! A second run is refused immediately with
//! [`LockError::ConcurrentModification`] and is expected to retry. Locks
//! carry a TTL so a run that dies without releasing cannot block the graph
//! forever; expired locks are taken over on the next acquire and removed by
//! a periodic sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use super::run::RunId;

/// Key of the single graph this server manages.
pub const DEFAULT_GRAPH: &str = "default";

/// The run currently holding a graph's lock.
#[derive(Debug, Clone)]
struct RunHolder {
    run_id: RunId,
    /// What the run is doing, e.g. "recompute_graph".
    operation: String,
    acquired_at: DateTime<Utc>,
    expires_at: Instant,
}

impl RunHolder {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A lock request that was refused.
#[derive(Debug, Clone, Serialize)]
pub struct RunDenial {
    pub graph: String,
    pub holder_run_id: RunId,
    pub holder_operation: String,
    pub held_since: DateTime<Utc>,
}

/// Errors from lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another run holds the graph.
    #[error("graph '{}' is locked by run {} ({})", .0.graph, .0.holder_run_id, .0.holder_operation)]
    ConcurrentModification(RunDenial),

    /// The run does not hold the graph's lock (released or expired).
    #[error("run {run_id} does not hold the lock on graph '{graph}'")]
    NotHeld { graph: String, run_id: RunId },
}

/// Status entry for one locked graph.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusEntry {
    pub graph: String,
    pub run_id: RunId,
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_in_secs: u64,
}

/// Per-graph run lock with TTL-based auto-expiry, backed by `DashMap`.
pub struct GraphLockManager {
    locks: DashMap<String, RunHolder>,
    default_ttl: Duration,
}

impl GraphLockManager {
    pub fn new(default_ttl: Duration) -> Self {
        GraphLockManager {
            locks: DashMap::new(),
            default_ttl,
        }
    }

    /// Tries to lock `graph` for a new run. The returned guard releases the
    /// lock when dropped.
    pub fn try_acquire(
        self: &Arc<Self>,
        graph: &str,
        operation: &str,
    ) -> Result<RunGuard, LockError> {
        let now = Instant::now();
        let holder = RunHolder {
            run_id: RunId::new(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
            expires_at: now + self.default_ttl,
        };
        let run_id = holder.run_id;

        match self.locks.entry(graph.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    let current = occupied.get();
                    return Err(LockError::ConcurrentModification(RunDenial {
                        graph: graph.to_string(),
                        holder_run_id: current.run_id,
                        holder_operation: current.operation.clone(),
                        held_since: current.acquired_at,
                    }));
                }
                let stale = occupied.insert(holder);
                tracing::warn!(
                    graph,
                    stale_run = %stale.run_id,
                    run = %run_id,
                    "took over expired graph lock"
                );
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
            }
        }

        tracing::debug!(graph, run = %run_id, operation, "graph lock acquired");
        Ok(RunGuard {
            manager: Arc::clone(self),
            graph: graph.to_string(),
            run_id,
        })
    }

    /// Releases `graph` if `run_id` still holds it.
    pub fn release(&self, graph: &str, run_id: RunId) -> Result<(), LockError> {
        match self.locks.remove_if(graph, |_, holder| holder.run_id == run_id) {
            Some(_) => {
                tracing::debug!(graph, run = %run_id, "graph lock released");
                Ok(())
            }
            None => Err(LockError::NotHeld {
                graph: graph.to_string(),
                run_id,
            }),
        }
    }

    /// All live locks, sorted by graph.
    pub fn status(&self) -> Vec<RunStatusEntry> {
        let now = Instant::now();
        let mut entries: Vec<RunStatusEntry> = self
            .locks
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| {
                let holder = entry.value();
                RunStatusEntry {
                    graph: entry.key().clone(),
                    run_id: holder.run_id,
                    operation: holder.operation.clone(),
                    acquired_at: holder.acquired_at,
                    expires_in_secs: holder.expires_at.saturating_duration_since(now).as_secs(),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.graph.cmp(&b.graph));
        entries
    }

    /// Removes expired locks and returns the graphs they were on.
    pub fn sweep_expired_locks(&self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .locks
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = Vec::new();
        for graph in expired {
            if self
                .locks
                .remove_if(&graph, |_, holder| holder.is_expired(now))
                .is_some()
            {
                released.push(graph);
            }
        }
        released
    }

    /// Spawns a background tokio task that periodically sweeps expired locks.
    pub fn start_expiry_sweep(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let released = manager.sweep_expired_locks();
                if !released.is_empty() {
                    tracing::info!("Swept {} expired graph lock(s): {:?}", released.len(), released);
                }
            }
        });
    }
}

/// Holds a graph lock for the lifetime of a run.
#[derive(Debug)]
pub struct RunGuard {
    manager: Arc<GraphLockManager>,
    graph: String,
    run_id: RunId,
}

impl RunGuard {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(err) = self.manager.release(&self.graph, self.run_id) {
            tracing::warn!(%err, "run finished after its graph lock expired");
        }
    }
}

impl std::fmt::Debug for GraphLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphLockManager")
            .field("locks", &self.locks.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl: Duration) -> Arc<GraphLockManager> {
        Arc::new(GraphLockManager::new(ttl))
    }

    #[test]
    fn second_run_is_refused() {
        let locks = manager(Duration::from_secs(60));
        let first = locks.try_acquire(DEFAULT_GRAPH, "recompute_graph").unwrap();

        match locks.try_acquire(DEFAULT_GRAPH, "create_edge") {
            Err(LockError::ConcurrentModification(denial)) => {
                assert_eq!(denial.holder_run_id, first.run_id());
                assert_eq!(denial.holder_operation, "recompute_graph");
            }
            other => panic!("expected ConcurrentModification, got {other:?}"),
        }
    }

    #[test]
    fn dropping_guard_releases() {
        let locks = manager(Duration::from_secs(60));
        {
            let _guard = locks.try_acquire(DEFAULT_GRAPH, "a").unwrap();
            assert_eq!(locks.status().len(), 1);
        }
        assert!(locks.status().is_empty());
        assert!(locks.try_acquire(DEFAULT_GRAPH, "b").is_ok());
    }

    #[test]
    fn graphs_lock_independently() {
        let locks = manager(Duration::from_secs(60));
        let _a = locks.try_acquire("a", "run").unwrap();
        let _b = locks.try_acquire("b", "run").unwrap();
        assert_eq!(locks.status().len(), 2);
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let locks = manager(Duration::ZERO);
        let stale = locks.try_acquire(DEFAULT_GRAPH, "stale").unwrap();
        let fresh = locks.try_acquire(DEFAULT_GRAPH, "fresh").unwrap();
        assert_ne!(stale.run_id(), fresh.run_id());

        // The stale guard no longer owns the lock.
        assert!(matches!(
            locks.release(DEFAULT_GRAPH, stale.run_id()),
            Err(LockError::NotHeld { .. })
        ));
    }

    #[test]
    fn sweep_removes_expired() {
        let locks = manager(Duration::ZERO);
        let guard = locks.try_acquire(DEFAULT_GRAPH, "run").unwrap();
        assert_eq!(locks.sweep_expired_locks(), vec![DEFAULT_GRAPH.to_string()]);
        assert!(locks.status().is_empty());
        drop(guard);
    }
}
