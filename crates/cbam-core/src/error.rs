//! Core error types for cbam-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! structural violations the graph model rejects at write time. Partial
//! propagation failures are not errors here; they are reported in
//! [`PropagationResult`](crate::result::PropagationResult).

use thiserror::Error;

use crate::edge::EdgeKind;
use crate::node::NodeRef;

/// Core errors produced by the cbam-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Edge endpoints are the same node.
    #[error("self-loop rejected: edge source and target are both {node}")]
    SelfLoop { node: NodeRef },

    /// Edge kind does not fit the kinds of its endpoints.
    #[error("invalid edge: {kind} edge cannot connect {from} -> {to}")]
    InvalidEdge {
        kind: EdgeKind,
        from: NodeRef,
        to: NodeRef,
    },

    /// An edge kind string could not be parsed.
    #[error("invalid edge kind: '{value}' (expected continue, produce or consume)")]
    InvalidEdgeKind { value: String },

    /// A node kind string could not be parsed.
    #[error("invalid node kind: '{value}' (expected process or product)")]
    InvalidNodeKind { value: String },

    /// A quantity was negative, NaN or otherwise unusable.
    #[error("invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    /// Fixed-point arithmetic overflowed.
    #[error("arithmetic overflow in {op}")]
    Overflow { op: &'static str },

    /// A node in the graph has no emission record.
    #[error("emission record missing for {node}")]
    EmissionMissing { node: NodeRef },

    /// A node was not present in the in-memory graph.
    #[error("node not found in graph: {node}")]
    NodeNotFound { node: NodeRef },
}
