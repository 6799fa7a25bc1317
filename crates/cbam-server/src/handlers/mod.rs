//! HTTP handler modules for the CBAM API.
//!
//! Each sub-module implements thin handlers that parse requests, acquire the
//! service lock, delegate to [`EmissionService`], and return JSON responses.
//! Handlers that can write propagated values first take the graph run lock,
//! so overlapping runs are refused with 409 instead of interleaving.
//!
//! [`EmissionService`]: crate::service::EmissionService

pub mod edges;
pub mod emissions;
pub mod health;

use crate::concurrency::{RunGuard, DEFAULT_GRAPH};
use crate::error::ApiError;
use crate::state::AppState;

/// Takes the run lock on the default graph for `operation`.
fn begin_run(state: &AppState, operation: &str) -> Result<RunGuard, ApiError> {
    Ok(state.lock_manager.try_acquire(DEFAULT_GRAPH, operation)?)
}
