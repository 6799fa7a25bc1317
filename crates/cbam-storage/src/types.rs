//! Storage-layer query types.

use serde::{Deserialize, Serialize};

use cbam_core::edge::{Edge, EdgeKind};
use cbam_core::node::NodeRef;

/// Selects edges by kind and endpoints. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFilter {
    pub kind: Option<EdgeKind>,
    /// Matches edges with this node at either end.
    pub node: Option<NodeRef>,
    pub source: Option<NodeRef>,
    pub target: Option<NodeRef>,
}

impl EdgeFilter {
    pub fn outgoing(node: NodeRef) -> Self {
        EdgeFilter {
            source: Some(node),
            ..Default::default()
        }
    }

    pub fn incoming(node: NodeRef) -> Self {
        EdgeFilter {
            target: Some(node),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, edge: &Edge) -> bool {
        self.kind.is_none_or(|k| edge.kind == k)
            && self.source.is_none_or(|s| edge.source == s)
            && self.target.is_none_or(|t| edge.target == t)
            && self
                .node
                .is_none_or(|n| edge.source == n || edge.target == n)
    }
}
