//! Outcome types of a propagation run.
//!
//! Partial failures are data, not errors: a missing emission record or a
//! cycle affects only the nodes involved, and the caller gets a
//! [`PropagationResult`] describing what was and was not written.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeRef;
use crate::quantity::Quantity;

/// A per-node failure reported in [`PropagationResult::errors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PropagationError {
    /// The node is referenced by an edge but has no emission record. Its
    /// whole connected component was left untouched.
    NodeEmissionMissing { node: NodeRef },
    /// The run's deadline passed before this node was written.
    DeadlineExceeded { node: NodeRef },
    /// The node's value does not fit a `Quantity`. Its whole connected
    /// component was left untouched.
    Overflow { node: NodeRef },
}

impl fmt::Display for PropagationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationError::NodeEmissionMissing { node } => {
                write!(f, "emission record missing for {node}")
            }
            PropagationError::DeadlineExceeded { node } => {
                write!(f, "deadline exceeded before {node} was written")
            }
            PropagationError::Overflow { node } => {
                write!(f, "arithmetic overflow computing {node}")
            }
        }
    }
}

/// One computed value, in the order it must be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeWrite {
    pub node: NodeRef,
    /// The value stored before this run.
    pub previous: Quantity,
    /// The finalized cumulative (process) or allocated (product) emission.
    pub value: Quantity,
}

impl NodeWrite {
    pub fn is_change(&self) -> bool {
        self.previous != self.value
    }
}

/// Summary returned to callers of the recalculation operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationResult {
    /// Number of nodes whose value was written in this run.
    pub updated_node_count: usize,
    /// Node sets forming cycles; their values were left as they were.
    pub cycles_detected: Vec<Vec<NodeRef>>,
    pub errors: Vec<PropagationError>,
    /// Nodes in scope that could not be finalized: downstream of a cycle, or
    /// in a component with a missing record or an overflowing node.
    pub skipped: Vec<NodeRef>,
    /// Whether the run stopped at its deadline.
    pub timed_out: bool,
}

impl PropagationResult {
    /// True when every node in scope was finalized and written.
    pub fn is_complete(&self) -> bool {
        self.cycles_detected.is_empty()
            && self.errors.is_empty()
            && self.skipped.is_empty()
            && !self.timed_out
    }
}
