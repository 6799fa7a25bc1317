//! Shared conversions between JSON values and core types.

use serde::Serialize;

use cbam_core::node::{NodeKind, NodeRef};
use cbam_core::quantity::Quantity;

use crate::concurrency::RunStatusEntry;
use crate::error::ApiError;

/// Parses a `(kind, id)` pair from request fields.
pub fn parse_node(kind: &str, id: i64) -> Result<NodeRef, ApiError> {
    let kind: NodeKind = kind.parse()?;
    Ok(NodeRef { kind, id })
}

/// Converts a JSON number to a non-negative [`Quantity`].
pub fn parse_quantity(field: &str, value: f64) -> Result<Quantity, ApiError> {
    let quantity = Quantity::from_f64(value)
        .map_err(|e| ApiError::BadRequest(format!("{field}: {e}")))?;
    if quantity.is_negative() {
        return Err(ApiError::BadRequest(format!("{field} must be >= 0, got {value}")));
    }
    Ok(quantity)
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Runs currently holding a graph lock.
    pub active_runs: Vec<RunStatusEntry>,
}
