//! Typed, directed edges between processes and products.
//!
//! The three [`EdgeKind`]s are the only relationships the propagation engine
//! understands:
//! - `Continue`: process -> process, the target inherits the source's
//!   cumulative emission.
//! - `Produce`: process -> product, the product is allocated the producing
//!   process's cumulative emission.
//! - `Consume`: product -> process, a ratio of the product's allocated
//!   emission flows into the consuming process.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::EdgeId;
use crate::node::{NodeKind, NodeRef};

/// The kind of an edge, deciding which propagation rule applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Continue,
    Produce,
    Consume,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Continue, EdgeKind::Produce, EdgeKind::Consume];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Continue => "continue",
            EdgeKind::Produce => "produce",
            EdgeKind::Consume => "consume",
        }
    }

    /// The `(source, target)` node kinds this edge kind connects.
    pub fn endpoint_kinds(self) -> (NodeKind, NodeKind) {
        match self {
            EdgeKind::Continue => (NodeKind::Process, NodeKind::Process),
            EdgeKind::Produce => (NodeKind::Process, NodeKind::Product),
            EdgeKind::Consume => (NodeKind::Product, NodeKind::Process),
        }
    }

    /// Rejects self-loops and endpoint kinds that do not fit this edge kind.
    pub fn validate_endpoints(self, source: NodeRef, target: NodeRef) -> Result<(), CoreError> {
        if source == target {
            return Err(CoreError::SelfLoop { node: source });
        }
        let (source_kind, target_kind) = self.endpoint_kinds();
        if source.kind != source_kind || target.kind != target_kind {
            return Err(CoreError::InvalidEdge {
                kind: self,
                from: source,
                to: target,
            });
        }
        Ok(())
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(EdgeKind::Continue),
            "produce" => Ok(EdgeKind::Produce),
            "consume" => Ok(EdgeKind::Consume),
            _ => Err(CoreError::InvalidEdgeKind {
                value: s.to_string(),
            }),
        }
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeRef,
    pub target: NodeRef,
    pub kind: EdgeKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An edge that has not been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEdge {
    pub source: NodeRef,
    pub target: NodeRef,
    pub kind: EdgeKind,
}

impl NewEdge {
    /// Creates a validated new edge.
    pub fn new(source: NodeRef, target: NodeRef, kind: EdgeKind) -> Result<Self, CoreError> {
        kind.validate_endpoints(source, target)?;
        Ok(NewEdge {
            source,
            target,
            kind,
        })
    }
}

/// Partial update of an edge. `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeUpdate {
    pub source: Option<NodeRef>,
    pub target: Option<NodeRef>,
    pub kind: Option<EdgeKind>,
}

impl EdgeUpdate {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.target.is_none() && self.kind.is_none()
    }

    /// Applies the update to `edge`, validating the resulting endpoints.
    /// Returns the updated edge; `edge` itself is left untouched.
    pub fn apply(&self, edge: &Edge, now: DateTime<Utc>) -> Result<Edge, CoreError> {
        let source = self.source.unwrap_or(edge.source);
        let target = self.target.unwrap_or(edge.target);
        let kind = self.kind.unwrap_or(edge.kind);
        kind.validate_endpoints(source, target)?;
        Ok(Edge {
            id: edge.id,
            source,
            target,
            kind,
            created_at: edge.created_at,
            updated_at: now,
        })
    }
}
