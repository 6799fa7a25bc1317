//! Node identity for the emission graph.
//!
//! Nodes are not stored on their own: a [`NodeRef`] is the `(kind, id)` pair
//! naming a process or product master record owned elsewhere. The ordering
//! on `NodeRef` (processes before products, then by id) is the tie-breaker
//! that keeps propagation deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{ProcessId, ProductId};

/// The two kinds of node in the emission graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Process,
    Product,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Process => "process",
            NodeKind::Product => "product",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(NodeKind::Process),
            "product" => Ok(NodeKind::Product),
            _ => Err(CoreError::InvalidNodeKind {
                value: s.to_string(),
            }),
        }
    }
}

/// A tagged reference to a process or product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: i64,
}

impl NodeRef {
    pub fn process(id: ProcessId) -> Self {
        NodeRef {
            kind: NodeKind::Process,
            id: id.0,
        }
    }

    pub fn product(id: ProductId) -> Self {
        NodeRef {
            kind: NodeKind::Product,
            id: id.0,
        }
    }

    pub fn is_process(&self) -> bool {
        self.kind == NodeKind::Process
    }

    pub fn is_product(&self) -> bool {
        self.kind == NodeKind::Product
    }

    /// Returns the process id if this node is a process.
    pub fn as_process(&self) -> Option<ProcessId> {
        self.is_process().then_some(ProcessId(self.id))
    }

    /// Returns the product id if this node is a product.
    pub fn as_product(&self) -> Option<ProductId> {
        self.is_product().then_some(ProductId(self.id))
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Lifecycle of a node within one propagation run.
///
/// `Uninitialized -> Direct -> Finalized`. A node reaches `Finalized` only
/// after every direct predecessor has. Nodes inside a cycle, or downstream of
/// one, stay `Direct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Uninitialized,
    Direct,
    Finalized,
}
