//! Post-run checks of the ledger invariants.
//!
//! A process's cumulative emission is never below its direct emission, and
//! equals it when no incoming `continue` or `consume` edge carries positive
//! emission. Products follow the same rule with `produce` edges.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeKind;
use crate::emission::EmissionSnapshot;
use crate::graph::EmissionGraph;
use crate::node::NodeRef;
use crate::quantity::Quantity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The propagated value is smaller than the node's direct emission.
    BelowDirect,
    /// Nothing flows into the node, yet its propagated value differs from
    /// its direct emission.
    UnexplainedInflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub node: NodeRef,
    pub kind: ViolationKind,
    pub direct: Quantity,
    pub propagated: Quantity,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ViolationKind::BelowDirect => "is below direct",
            ViolationKind::UnexplainedInflow => "differs from direct with no inflow",
        };
        write!(
            f,
            "{}: propagated {} {what} {}",
            self.node, self.propagated, self.direct
        )
    }
}

/// Whether any incoming edge of `node` carries a positive value.
fn has_positive_inflow(graph: &EmissionGraph, node: NodeRef) -> bool {
    graph.incoming(node).iter().any(|adj| {
        let Some(source) = graph.snapshot(adj.node) else {
            return false;
        };
        match (adj.edge.kind, source) {
            (EdgeKind::Continue | EdgeKind::Produce, s) => s.propagated_value() > Quantity::ZERO,
            (EdgeKind::Consume, EmissionSnapshot::Product(p)) => p
                .consume_contribution()
                .map(|c| c > Quantity::ZERO)
                .unwrap_or(true),
            (EdgeKind::Consume, EmissionSnapshot::Process(_)) => false,
        }
    })
}

/// Checks every node with a record, skipping members of `cycles` since
/// their values are left as they were.
pub fn validate_ledger(graph: &EmissionGraph, cycles: &[Vec<NodeRef>]) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for node in graph.nodes() {
        if cycles.iter().any(|c| c.contains(&node)) {
            continue;
        }
        let Some(snapshot) = graph.snapshot(node) else {
            continue;
        };
        let direct = snapshot.base_value();
        let propagated = snapshot.propagated_value();

        let kind = if propagated < direct {
            Some(ViolationKind::BelowDirect)
        } else if propagated != direct && !has_positive_inflow(graph, node) {
            Some(ViolationKind::UnexplainedInflow)
        } else {
            None
        };
        if let Some(kind) = kind {
            violations.push(InvariantViolation {
                node,
                kind,
                direct,
                propagated,
            });
        }
    }
    violations
}
