//! EmissionGraph: the in-memory view a propagation run works on.
//!
//! [`EmissionGraph`] is built once per run from one batched read of edges
//! and one batched read of emission records. It wraps a petgraph
//! `StableGraph<NodeRef, EdgeRecord>` together with the ledger snapshot of
//! every node that has a record. Nodes referenced by an edge but lacking a
//! record are kept in the graph without a snapshot so the engine can report
//! them.
//!
//! All query methods return nodes in `NodeRef` order, never in petgraph
//! index order, so results do not depend on load order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeKind};
use crate::emission::{EmissionSnapshot, ProcessEmission, ProductEmission};
use crate::error::CoreError;
use crate::id::EdgeId;
use crate::node::NodeRef;

/// Edge weight stored in the petgraph graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub kind: EdgeKind,
}

/// An edge as seen from one of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjacent {
    /// The node on the other end of the edge.
    pub node: NodeRef,
    pub edge: EdgeRecord,
}

/// The traversable emission graph with per-node ledger snapshots.
#[derive(Debug, Clone, Default)]
pub struct EmissionGraph {
    graph: StableGraph<NodeRef, EdgeRecord, Directed, u32>,
    indices: HashMap<NodeRef, NodeIndex<u32>>,
    snapshots: BTreeMap<NodeRef, EmissionSnapshot>,
}

impl EmissionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    fn ensure_node(&mut self, node: NodeRef) -> NodeIndex<u32> {
        if let Some(&idx) = self.indices.get(&node) {
            return idx;
        }
        let idx = self.graph.add_node(node);
        self.indices.insert(node, idx);
        idx
    }

    pub fn add_process(&mut self, record: ProcessEmission) {
        let node = record.node();
        self.ensure_node(node);
        self.snapshots.insert(node, EmissionSnapshot::Process(record));
    }

    pub fn add_product(&mut self, record: ProductEmission) {
        let node = record.node();
        self.ensure_node(node);
        self.snapshots.insert(node, EmissionSnapshot::Product(record));
    }

    /// Adds a stored edge, re-checking its structural validity.
    pub fn add_edge(&mut self, edge: &Edge) -> Result<(), CoreError> {
        edge.kind.validate_endpoints(edge.source, edge.target)?;
        let source = self.ensure_node(edge.source);
        let target = self.ensure_node(edge.target);
        self.graph.add_edge(
            source,
            target,
            EdgeRecord {
                id: edge.id,
                kind: edge.kind,
            },
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.indices.contains_key(&node)
    }

    /// All nodes, sorted.
    pub fn nodes(&self) -> Vec<NodeRef> {
        let mut nodes: Vec<NodeRef> = self.indices.keys().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn snapshot(&self, node: NodeRef) -> Option<&EmissionSnapshot> {
        self.snapshots.get(&node)
    }

    /// Nodes that appear in an edge but have no emission record.
    pub fn missing_records(&self) -> Vec<NodeRef> {
        self.nodes()
            .into_iter()
            .filter(|n| !self.snapshots.contains_key(n))
            .collect()
    }

    /// Incoming edges of `node`, sorted by (source, edge id).
    pub fn incoming(&self, node: NodeRef) -> Vec<Adjacent> {
        self.adjacent(node, Direction::Incoming)
    }

    /// Outgoing edges of `node`, sorted by (target, edge id).
    pub fn outgoing(&self, node: NodeRef) -> Vec<Adjacent> {
        self.adjacent(node, Direction::Outgoing)
    }

    fn adjacent(&self, node: NodeRef, direction: Direction) -> Vec<Adjacent> {
        let Some(&idx) = self.indices.get(&node) else {
            return Vec::new();
        };
        let mut result: Vec<Adjacent> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| {
                let other = match direction {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                Adjacent {
                    node: self.graph[other],
                    edge: *e.weight(),
                }
            })
            .collect();
        result.sort_by_key(|a| (a.node, a.edge.id));
        result
    }

    // -----------------------------------------------------------------------
    // Traversals
    // -----------------------------------------------------------------------

    /// Every node reachable from `seeds` along edge direction, seeds included.
    /// Seeds not present in the graph are ignored.
    pub fn forward_reachable(&self, seeds: &[NodeRef]) -> BTreeSet<NodeRef> {
        let mut seen: BTreeSet<NodeRef> = BTreeSet::new();
        let mut queue: VecDeque<NodeRef> = VecDeque::new();
        for &seed in seeds {
            if self.contains(seed) && seen.insert(seed) {
                queue.push_back(seed);
            }
        }
        while let Some(node) = queue.pop_front() {
            for adj in self.outgoing(node) {
                if seen.insert(adj.node) {
                    queue.push_back(adj.node);
                }
            }
        }
        seen
    }

    /// Node sets that form directed cycles.
    ///
    /// Runs Tarjan's strongly-connected-components search (a depth-first
    /// traversal with an on-stack marker set). Every component with more
    /// than one node, or with a self-edge, is a cycle. Each set is sorted
    /// and the list is sorted by its first node.
    pub fn detect_cycles(&self) -> Vec<Vec<NodeRef>> {
        let mut cycles: Vec<Vec<NodeRef>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&idx| self.graph.contains_edge(idx, idx))
            })
            .map(|component| {
                let mut nodes: Vec<NodeRef> =
                    component.into_iter().map(|idx| self.graph[idx]).collect();
                nodes.sort();
                nodes
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Nodes weakly connected to `node`, itself included. Empty when the
    /// node is not in the graph.
    pub fn component_of(&self, node: NodeRef) -> BTreeSet<NodeRef> {
        let mut component = BTreeSet::new();
        if !self.indices.contains_key(&node) {
            return component;
        }
        component.insert(node);
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            let Some(&idx) = self.indices.get(&current) else {
                continue;
            };
            for neighbor in self.graph.neighbors_undirected(idx) {
                let other = self.graph[neighbor];
                if component.insert(other) {
                    queue.push_back(other);
                }
            }
        }
        component
    }

    /// Weakly connected components (edge direction ignored), each sorted,
    /// listed by their smallest node.
    pub fn connected_components(&self) -> Vec<BTreeSet<NodeRef>> {
        let mut assigned: BTreeSet<NodeRef> = BTreeSet::new();
        let mut components = Vec::new();
        for start in self.nodes() {
            if assigned.contains(&start) {
                continue;
            }
            let component = self.component_of(start);
            assigned.extend(component.iter().copied());
            components.push(component);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ProcessId, ProductId};
    use crate::quantity::Quantity;
    use chrono::Utc;

    fn p(id: i64) -> NodeRef {
        NodeRef::process(ProcessId(id))
    }

    fn edge(id: i64, source: NodeRef, target: NodeRef, kind: EdgeKind) -> Edge {
        let now = Utc::now();
        Edge {
            id: EdgeId(id),
            source,
            target,
            kind,
            created_at: now,
            updated_at: now,
        }
    }

    fn chain_graph() -> EmissionGraph {
        let mut g = EmissionGraph::new();
        for id in 1..=3 {
            g.add_process(ProcessEmission::new(ProcessId(id), Quantity::ZERO));
        }
        g.add_edge(&edge(1, p(1), p(2), EdgeKind::Continue)).unwrap();
        g.add_edge(&edge(2, p(2), p(3), EdgeKind::Continue)).unwrap();
        g
    }

    #[test]
    fn counts_and_adjacency() {
        let g = chain_graph();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);

        let incoming = g.incoming(p(2));
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].node, p(1));
        assert_eq!(incoming[0].edge.kind, EdgeKind::Continue);

        let outgoing = g.outgoing(p(2));
        assert_eq!(outgoing[0].node, p(3));
        assert!(g.incoming(p(99)).is_empty());
    }

    #[test]
    fn add_edge_rejects_malformed() {
        let mut g = EmissionGraph::new();
        let product = NodeRef::product(ProductId(1));
        assert!(g.add_edge(&edge(1, p(1), product, EdgeKind::Continue)).is_err());
        assert!(g.add_edge(&edge(2, p(1), p(1), EdgeKind::Continue)).is_err());
    }

    #[test]
    fn edge_endpoints_without_records_are_missing() {
        let mut g = chain_graph();
        g.add_edge(&edge(3, p(3), p(4), EdgeKind::Continue)).unwrap();
        assert_eq!(g.missing_records(), vec![p(4)]);
    }

    #[test]
    fn forward_reachable_follows_edges() {
        let g = chain_graph();
        let reach = g.forward_reachable(&[p(2)]);
        assert_eq!(reach.into_iter().collect::<Vec<_>>(), vec![p(2), p(3)]);
        assert!(g.forward_reachable(&[p(42)]).is_empty());
    }

    #[test]
    fn detect_cycles_reports_sorted_sets() {
        let mut g = chain_graph();
        assert!(g.detect_cycles().is_empty());

        g.add_edge(&edge(3, p(3), p(2), EdgeKind::Continue)).unwrap();
        assert_eq!(g.detect_cycles(), vec![vec![p(2), p(3)]]);
    }

    #[test]
    fn connected_components_ignore_direction() {
        let mut g = chain_graph();
        g.add_process(ProcessEmission::new(ProcessId(10), Quantity::ZERO));
        g.add_process(ProcessEmission::new(ProcessId(11), Quantity::ZERO));
        g.add_edge(&edge(9, p(11), p(10), EdgeKind::Continue)).unwrap();

        let components = g.connected_components();
        assert_eq!(components.len(), 2);
        assert!(components[0].contains(&p(1)) && components[0].contains(&p(3)));
        assert_eq!(components[1].len(), 2);
        assert_eq!(g.component_of(p(10)), components[1]);
        assert!(g.component_of(p(99)).is_empty());
    }
}
