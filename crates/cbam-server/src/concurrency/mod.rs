//! Run-level concurrency control.
//!
//! - [`run::RunId`] identifies one propagation run
//! - [`lock_manager::GraphLockManager`] grants one run at a time per graph

pub mod lock_manager;
pub mod run;

pub use lock_manager::{
    GraphLockManager, LockError, RunDenial, RunGuard, RunStatusEntry, DEFAULT_GRAPH,
};
pub use run::RunId;
