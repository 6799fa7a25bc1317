//! Linear process chains.
//!
//! A chain starts at a process and follows its single outgoing `continue`
//! edge for as long as the next process has exactly one incoming `continue`
//! edge. It ends at a leaf, a fork, a join, or a process already visited.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeKind;
use crate::emission::EmissionSnapshot;
use crate::error::CoreError;
use crate::graph::EmissionGraph;
use crate::id::ProcessId;
use crate::node::NodeRef;
use crate::quantity::Quantity;

/// Why a chain walk stopped at its last process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainEnd {
    /// No outgoing `continue` edge.
    Leaf,
    /// More than one outgoing `continue` edge.
    Fork,
    /// The next process has several incoming `continue` edges.
    Join,
    /// The next process was already part of the chain.
    Revisit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    /// The starting process; it identifies the chain.
    pub chain_id: ProcessId,
    pub processes: Vec<ProcessId>,
    /// Sum of the direct emissions of every process in the chain.
    pub total_direct_emission: Quantity,
    /// Cumulative emission stored for the last process.
    pub end_cumulative_emission: Quantity,
    pub end: ChainEnd,
}

fn continue_targets(graph: &EmissionGraph, node: NodeRef) -> Vec<NodeRef> {
    graph
        .outgoing(node)
        .into_iter()
        .filter(|adj| adj.edge.kind == EdgeKind::Continue)
        .map(|adj| adj.node)
        .collect()
}

fn continue_in_degree(graph: &EmissionGraph, node: NodeRef) -> usize {
    graph
        .incoming(node)
        .iter()
        .filter(|adj| adj.edge.kind == EdgeKind::Continue)
        .count()
}

fn process_record(
    graph: &EmissionGraph,
    node: NodeRef,
) -> Result<(Quantity, Quantity), CoreError> {
    match graph.snapshot(node) {
        Some(EmissionSnapshot::Process(p)) => Ok((p.direct_emission, p.cumulative_emission)),
        _ => Err(CoreError::EmissionMissing { node }),
    }
}

/// Walks the chain starting at `start`.
pub fn chain_summary(graph: &EmissionGraph, start: ProcessId) -> Result<ChainSummary, CoreError> {
    let start_node = NodeRef::process(start);
    if !graph.contains(start_node) {
        return Err(CoreError::NodeNotFound { node: start_node });
    }

    let mut visited = BTreeSet::from([start_node]);
    let mut processes = vec![start];
    let (mut total_direct, mut end_cumulative) = process_record(graph, start_node)?;
    let mut current = start_node;

    let end = loop {
        let targets = continue_targets(graph, current);
        let next = match targets.as_slice() {
            [] => break ChainEnd::Leaf,
            [only] => *only,
            _ => break ChainEnd::Fork,
        };
        if visited.contains(&next) {
            break ChainEnd::Revisit;
        }
        if continue_in_degree(graph, next) > 1 {
            break ChainEnd::Join;
        }

        let (direct, cumulative) = process_record(graph, next)?;
        total_direct = total_direct.checked_add(direct)?;
        end_cumulative = cumulative;
        visited.insert(next);
        if let Some(id) = next.as_process() {
            processes.push(id);
        }
        current = next;
    };

    Ok(ChainSummary {
        chain_id: start,
        processes,
        total_direct_emission: total_direct,
        end_cumulative_emission: end_cumulative,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::emission::ProcessEmission;
    use crate::id::EdgeId;
    use chrono::Utc;

    fn q(units: i64) -> Quantity {
        Quantity::from_units(units).unwrap()
    }

    fn p(id: i64) -> NodeRef {
        NodeRef::process(ProcessId(id))
    }

    fn graph(processes: &[(i64, i64, i64)], edges: &[(i64, i64)]) -> EmissionGraph {
        let mut g = EmissionGraph::new();
        for &(id, direct, cumulative) in processes {
            g.add_process(ProcessEmission {
                process_id: ProcessId(id),
                direct_emission: q(direct),
                cumulative_emission: q(cumulative),
            });
        }
        let now = Utc::now();
        for (i, &(s, t)) in edges.iter().enumerate() {
            g.add_edge(&Edge {
                id: EdgeId(i as i64 + 1),
                source: p(s),
                target: p(t),
                kind: EdgeKind::Continue,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        }
        g
    }

    #[test]
    fn linear_chain() {
        let g = graph(&[(1, 10, 10), (2, 15, 25), (3, 20, 45)], &[(1, 2), (2, 3)]);
        let summary = chain_summary(&g, ProcessId(1)).unwrap();
        assert_eq!(
            summary.processes,
            vec![ProcessId(1), ProcessId(2), ProcessId(3)]
        );
        assert_eq!(summary.total_direct_emission, q(45));
        assert_eq!(summary.end_cumulative_emission, q(45));
        assert_eq!(summary.end, ChainEnd::Leaf);
    }

    #[test]
    fn stops_at_fork() {
        let g = graph(&[(1, 1, 1), (2, 1, 2), (3, 1, 2)], &[(1, 2), (1, 3)]);
        let summary = chain_summary(&g, ProcessId(1)).unwrap();
        assert_eq!(summary.processes, vec![ProcessId(1)]);
        assert_eq!(summary.end, ChainEnd::Fork);
    }

    #[test]
    fn stops_before_join() {
        let g = graph(&[(1, 1, 1), (2, 1, 1), (3, 1, 3)], &[(1, 3), (2, 3)]);
        let summary = chain_summary(&g, ProcessId(1)).unwrap();
        assert_eq!(summary.processes, vec![ProcessId(1)]);
        assert_eq!(summary.end, ChainEnd::Join);
    }

    #[test]
    fn stops_on_revisit() {
        let g = graph(&[(1, 1, 1), (2, 1, 1)], &[(1, 2), (2, 1)]);
        let summary = chain_summary(&g, ProcessId(1)).unwrap();
        assert_eq!(summary.processes, vec![ProcessId(1), ProcessId(2)]);
        assert_eq!(summary.end, ChainEnd::Revisit);
    }

    #[test]
    fn unknown_start() {
        let g = graph(&[(1, 1, 1)], &[]);
        assert!(matches!(
            chain_summary(&g, ProcessId(7)),
            Err(CoreError::NodeNotFound { .. })
        ));
    }
}
