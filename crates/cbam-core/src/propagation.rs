//! The edge-based emission propagation engine.
//!
//! [`propagate`] is a pure function: given an [`EmissionGraph`] and a [`Scope`]
//! it computes the finalized value of every node it can, in topological
//! order, and returns them as a [`PropagationPlan`] for the caller to write.
//! Nothing here performs I/O.
//!
//! # Rules
//!
//! For a process `t`:
//! `cumulative(t) = direct(t) + Σ cumulative(s) over continue edges s -> t
//!                            + Σ contribution(p) over consume edges p -> t`
//!
//! For a product `p`:
//! `allocated(p) = direct(p) + Σ cumulative(s) over produce edges s -> p`
//!
//! where `contribution(p) = allocated(p) * amount_to_next_stage(p) / produced(p)`.
//! Each consume edge carries the full ratio-based contribution; a product
//! feeding several processes contributes to each of them independently.
//!
//! # Traversal
//!
//! Kahn's algorithm over the nodes in scope, with a sorted ready set so ties
//! are broken by `NodeRef` order. Contributions are fixed-point integer sums,
//! so the order in which incoming edges are visited never changes a result.
//! Nodes outside the scope are read with their stored values.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::edge::EdgeKind;
use crate::emission::EmissionSnapshot;
use crate::error::CoreError;
use crate::graph::{Adjacent, EmissionGraph};
use crate::node::{NodeRef, NodeState};
use crate::quantity::Quantity;
use crate::result::{NodeWrite, PropagationError, PropagationResult};

/// Which nodes a run recomputes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "seeds", rename_all = "snake_case")]
pub enum Scope {
    /// Every node in the graph, from base case.
    All,
    /// The seeds and everything forward-reachable from them.
    Forward(Vec<NodeRef>),
}

/// Computed outcome of a run, before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationPlan {
    /// Finalized values in the order they must be written.
    pub writes: Vec<NodeWrite>,
    pub cycles: Vec<Vec<NodeRef>>,
    pub errors: Vec<PropagationError>,
    pub skipped: Vec<NodeRef>,
    /// Lifecycle state reached by every node in scope.
    pub states: BTreeMap<NodeRef, NodeState>,
}

impl PropagationPlan {
    /// Number of nodes whose value differs from what is stored.
    pub fn changed_count(&self) -> usize {
        self.writes.iter().filter(|w| w.is_change()).count()
    }

    /// Builds the caller-facing result once `written` writes have been
    /// committed. Writes past that point are reported as unprocessed.
    pub fn into_result(self, written: usize) -> PropagationResult {
        let timed_out = written < self.writes.len();
        let mut errors = self.errors;
        errors.extend(
            self.writes[written.min(self.writes.len())..]
                .iter()
                .map(|w| PropagationError::DeadlineExceeded { node: w.node }),
        );
        PropagationResult {
            updated_node_count: written.min(self.writes.len()),
            cycles_detected: self.cycles,
            errors,
            skipped: self.skipped,
            timed_out,
        }
    }
}

/// Computes finalized emission values for every node in `scope`.
///
/// Cycle members keep their stored values and stay [`NodeState::Direct`];
/// nodes downstream of a cycle cannot finalize and are reported as skipped.
/// A connected component containing a node without an emission record is
/// skipped entirely and every such node is reported as
/// [`PropagationError::NodeEmissionMissing`]. Likewise a node whose value
/// overflows is reported as [`PropagationError::Overflow`] and its component
/// is not written. Other components are not affected.
pub fn propagate(graph: &EmissionGraph, scope: &Scope) -> Result<PropagationPlan, CoreError> {
    let in_scope: BTreeSet<NodeRef> = match scope {
        Scope::All => graph.nodes().into_iter().collect(),
        Scope::Forward(seeds) => graph.forward_reachable(seeds),
    };

    let mut result = PropagationPlan::default();
    if in_scope.is_empty() {
        return Ok(result);
    }

    // Cycles: every cycle touching the scope is reported; anything forward of
    // a cycle member cannot finalize.
    let all_cycles = graph.detect_cycles();
    let cycle_members: Vec<NodeRef> = all_cycles.iter().flatten().copied().collect();
    let cycle_set: BTreeSet<NodeRef> = cycle_members.iter().copied().collect();
    let downstream_of_cycles = graph.forward_reachable(&cycle_members);
    result.cycles = all_cycles
        .into_iter()
        .filter(|cycle| cycle.iter().any(|n| in_scope.contains(n)))
        .collect();

    let components = graph.connected_components();
    let component_index: HashMap<NodeRef, usize> = components
        .iter()
        .enumerate()
        .flat_map(|(i, component)| component.iter().map(move |&n| (n, i)))
        .collect();

    // Missing records halt their whole connected component.
    let mut halted: BTreeSet<NodeRef> = BTreeSet::new();
    for component in &components {
        if !component.iter().any(|n| in_scope.contains(n)) {
            continue;
        }
        let missing: Vec<NodeRef> = component
            .iter()
            .copied()
            .filter(|n| graph.snapshot(*n).is_none())
            .collect();
        if missing.is_empty() {
            continue;
        }
        result.errors.extend(
            missing
                .iter()
                .map(|&node| PropagationError::NodeEmissionMissing { node }),
        );
        halted.extend(component.iter().copied());
    }

    // Partition the scope.
    let mut active: BTreeSet<NodeRef> = BTreeSet::new();
    for &node in &in_scope {
        if graph.snapshot(node).is_none() {
            result.states.insert(node, NodeState::Uninitialized);
        } else if halted.contains(&node) {
            result.states.insert(node, NodeState::Direct);
            result.skipped.push(node);
        } else if cycle_set.contains(&node) {
            result.states.insert(node, NodeState::Direct);
        } else if downstream_of_cycles.contains(&node) {
            result.states.insert(node, NodeState::Direct);
            result.skipped.push(node);
        } else {
            active.insert(node);
        }
    }

    let order = topological_order(graph, &active);
    let mut finalized: HashMap<NodeRef, Quantity> = HashMap::with_capacity(order.len());
    let mut computed: Vec<NodeWrite> = Vec::with_capacity(order.len());
    let mut overflowed_nodes: BTreeSet<NodeRef> = BTreeSet::new();
    let mut overflowed_components: BTreeSet<usize> = BTreeSet::new();
    let in_overflowed = |node: &NodeRef, failed: &BTreeSet<usize>| {
        component_index
            .get(node)
            .is_some_and(|c| failed.contains(c))
    };

    for node in order {
        if in_overflowed(&node, &overflowed_components) {
            continue;
        }
        let Some(snapshot) = graph.snapshot(node) else {
            continue;
        };
        match compute_node(graph, node, snapshot, &finalized) {
            Ok(value) => {
                finalized.insert(node, value);
                computed.push(NodeWrite {
                    node,
                    previous: snapshot.propagated_value(),
                    value,
                });
            }
            Err(CoreError::Overflow { .. }) => {
                result.errors.push(PropagationError::Overflow { node });
                overflowed_nodes.insert(node);
                if let Some(&c) = component_index.get(&node) {
                    overflowed_components.insert(c);
                }
            }
            Err(other) => return Err(other),
        }
    }

    // An overflow discards everything already computed in its component.
    for write in computed {
        if !in_overflowed(&write.node, &overflowed_components) {
            result.states.insert(write.node, NodeState::Finalized);
            result.writes.push(write);
        }
    }
    for &node in &active {
        if in_overflowed(&node, &overflowed_components) {
            result.states.insert(node, NodeState::Direct);
            if !overflowed_nodes.contains(&node) {
                result.skipped.push(node);
            }
        }
    }
    result.skipped.sort();

    Ok(result)
}

/// Kahn's algorithm restricted to `active`. Predecessors outside `active`
/// are treated as already finalized.
fn topological_order(graph: &EmissionGraph, active: &BTreeSet<NodeRef>) -> Vec<NodeRef> {
    let mut in_degree: BTreeMap<NodeRef, usize> = BTreeMap::new();
    for &node in active {
        let degree = graph
            .incoming(node)
            .iter()
            .filter(|adj| active.contains(&adj.node))
            .count();
        in_degree.insert(node, degree);
    }

    let mut ready: BTreeSet<NodeRef> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();

    let mut sorted = Vec::with_capacity(active.len());
    while let Some(node) = ready.pop_first() {
        sorted.push(node);
        for adj in graph.outgoing(node) {
            if let Some(degree) = in_degree.get_mut(&adj.node) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(adj.node);
                }
            }
        }
    }

    sorted
}

/// Value of a predecessor: this run's finalized value if it has one,
/// otherwise what the ledger holds.
fn upstream_value(
    graph: &EmissionGraph,
    node: NodeRef,
    finalized: &HashMap<NodeRef, Quantity>,
) -> Result<Quantity, CoreError> {
    if let Some(&value) = finalized.get(&node) {
        return Ok(value);
    }
    graph
        .snapshot(node)
        .map(|s| s.propagated_value())
        .ok_or(CoreError::EmissionMissing { node })
}

/// Applies the rule of each incoming edge and combines them.
fn compute_node(
    graph: &EmissionGraph,
    node: NodeRef,
    snapshot: &EmissionSnapshot,
    finalized: &HashMap<NodeRef, Quantity>,
) -> Result<Quantity, CoreError> {
    let mut contributions = Vec::new();
    for adj in graph.incoming(node) {
        contributions.push(edge_contribution(graph, &adj, finalized)?);
    }
    snapshot
        .base_value()
        .checked_add(Quantity::checked_sum(contributions)?)
}

/// The amount one incoming edge adds to its target.
fn edge_contribution(
    graph: &EmissionGraph,
    adj: &Adjacent,
    finalized: &HashMap<NodeRef, Quantity>,
) -> Result<Quantity, CoreError> {
    match adj.edge.kind {
        EdgeKind::Continue | EdgeKind::Produce => upstream_value(graph, adj.node, finalized),
        EdgeKind::Consume => {
            let allocated = upstream_value(graph, adj.node, finalized)?;
            match graph.snapshot(adj.node) {
                Some(EmissionSnapshot::Product(product)) => {
                    let mut product = *product;
                    product.allocated_emission = allocated;
                    product.consume_contribution()
                }
                _ => Err(CoreError::EmissionMissing { node: adj.node }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::emission::{ProcessEmission, ProductAmounts, ProductEmission};
    use crate::id::{EdgeId, ProcessId, ProductId};
    use chrono::Utc;
    use proptest::prelude::*;

    fn q(units: i64) -> Quantity {
        Quantity::from_units(units).unwrap()
    }

    fn p(id: i64) -> NodeRef {
        NodeRef::process(ProcessId(id))
    }

    fn prod(id: i64) -> NodeRef {
        NodeRef::product(ProductId(id))
    }

    /// Small builder for test graphs.
    struct Builder {
        graph: EmissionGraph,
        next_edge: i64,
    }

    impl Builder {
        fn new() -> Self {
            Builder {
                graph: EmissionGraph::new(),
                next_edge: 1,
            }
        }

        fn process(mut self, id: i64, direct: i64) -> Self {
            self.graph
                .add_process(ProcessEmission::new(ProcessId(id), q(direct)));
            self
        }

        fn process_raw(mut self, id: i64, direct: i64) -> Self {
            self.graph
                .add_process(ProcessEmission::new(ProcessId(id), Quantity(direct)));
            self
        }

        fn process_with(mut self, id: i64, direct: i64, cumulative: i64) -> Self {
            self.graph.add_process(ProcessEmission {
                process_id: ProcessId(id),
                direct_emission: q(direct),
                cumulative_emission: q(cumulative),
            });
            self
        }

        fn product(mut self, id: i64, produced: i64, sold: i64, eu_sold: i64) -> Self {
            self.graph.add_product(ProductEmission::new(
                ProductId(id),
                ProductAmounts {
                    direct_emission: Quantity::ZERO,
                    produced_amount: q(produced),
                    sold_amount: q(sold),
                    eu_sold_amount: q(eu_sold),
                },
            ));
            self
        }

        fn edge(mut self, source: NodeRef, target: NodeRef, kind: EdgeKind) -> Self {
            let now = Utc::now();
            self.graph
                .add_edge(&Edge {
                    id: EdgeId(self.next_edge),
                    source,
                    target,
                    kind,
                    created_at: now,
                    updated_at: now,
                })
                .unwrap();
            self.next_edge += 1;
            self
        }

        fn build(self) -> EmissionGraph {
            self.graph
        }
    }

    fn value_of(plan: &PropagationPlan, node: NodeRef) -> Option<Quantity> {
        plan.writes.iter().find(|w| w.node == node).map(|w| w.value)
    }

    #[test]
    fn isolated_process_is_its_own_base_case() {
        let g = Builder::new().process_with(1, 10, 99).build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, p(1)), Some(q(10)));
        assert_eq!(plan.changed_count(), 1);
    }

    #[test]
    fn chain_accumulates() {
        let g = Builder::new()
            .process(1, 10)
            .process(2, 15)
            .process(3, 20)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(2), p(3), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, p(1)), Some(q(10)));
        assert_eq!(value_of(&plan, p(2)), Some(q(25)));
        assert_eq!(value_of(&plan, p(3)), Some(q(45)));
        let order: Vec<NodeRef> = plan.writes.iter().map(|w| w.node).collect();
        assert_eq!(order, vec![p(1), p(2), p(3)]);
    }

    #[test]
    fn fan_in_continue_sums_sources() {
        let g = Builder::new()
            .process(1, 5)
            .process(2, 7)
            .process(3, 3)
            .edge(p(1), p(3), EdgeKind::Continue)
            .edge(p(2), p(3), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, p(3)), Some(q(15)));
    }

    #[test]
    fn produce_allocates_full_cumulative() {
        let g = Builder::new()
            .process(1, 10)
            .process(2, 15)
            .process(3, 20)
            .product(1, 100, 0, 0)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(2), p(3), EdgeKind::Continue)
            .edge(p(3), prod(1), EdgeKind::Produce)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, prod(1)), Some(q(45)));
    }

    #[test]
    fn multiple_producers_sum() {
        let g = Builder::new()
            .process(1, 4)
            .process(2, 6)
            .product(1, 10, 0, 0)
            .edge(p(1), prod(1), EdgeKind::Produce)
            .edge(p(2), prod(1), EdgeKind::Produce)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, prod(1)), Some(q(10)));
    }

    #[test]
    fn consume_adds_ratio_of_allocated() {
        let g = Builder::new()
            .process(1, 100)
            .process(2, 5)
            .product(1, 100, 20, 10)
            .edge(p(1), prod(1), EdgeKind::Produce)
            .edge(prod(1), p(2), EdgeKind::Consume)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, prod(1)), Some(q(100)));
        // 5 direct + 100 * 70 / 100
        assert_eq!(value_of(&plan, p(2)), Some(q(75)));
    }

    #[test]
    fn consume_stacks_on_continue() {
        let g = Builder::new()
            .process(1, 100)
            .process(2, 10)
            .process(3, 1)
            .product(1, 100, 50, 0)
            .edge(p(1), prod(1), EdgeKind::Produce)
            .edge(prod(1), p(3), EdgeKind::Consume)
            .edge(p(2), p(3), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        // 1 direct + 10 continue + 50 consume
        assert_eq!(value_of(&plan, p(3)), Some(q(61)));
    }

    #[test]
    fn each_consumer_gets_full_contribution() {
        let g = Builder::new()
            .process(1, 100)
            .process(2, 0)
            .process(3, 0)
            .product(1, 100, 20, 10)
            .edge(p(1), prod(1), EdgeKind::Produce)
            .edge(prod(1), p(2), EdgeKind::Consume)
            .edge(prod(1), p(3), EdgeKind::Consume)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, p(2)), Some(q(70)));
        assert_eq!(value_of(&plan, p(3)), Some(q(70)));
    }

    #[test]
    fn duplicate_edges_are_additive() {
        let g = Builder::new()
            .process(1, 5)
            .process(2, 1)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(1), p(2), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(value_of(&plan, p(2)), Some(q(11)));
    }

    #[test]
    fn cycle_is_isolated_from_unrelated_chain() {
        let g = Builder::new()
            .process_with(1, 1, 7)
            .process_with(2, 2, 8)
            .process(3, 3)
            .process(4, 4)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(2), p(1), EdgeKind::Continue)
            .edge(p(3), p(4), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();

        assert_eq!(plan.cycles, vec![vec![p(1), p(2)]]);
        assert_eq!(value_of(&plan, p(1)), None);
        assert_eq!(value_of(&plan, p(2)), None);
        assert_eq!(plan.states[&p(1)], NodeState::Direct);
        assert_eq!(value_of(&plan, p(4)), Some(q(7)));
        assert_eq!(plan.states[&p(4)], NodeState::Finalized);
        assert!(plan.errors.is_empty());
    }

    #[test]
    fn nodes_downstream_of_cycle_are_skipped() {
        let g = Builder::new()
            .process(1, 1)
            .process(2, 2)
            .process(3, 3)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(2), p(1), EdgeKind::Continue)
            .edge(p(2), p(3), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(plan.skipped, vec![p(3)]);
        assert!(plan.writes.is_empty());
    }

    #[test]
    fn cycle_through_product_is_detected() {
        let g = Builder::new()
            .process(1, 1)
            .product(1, 10, 0, 0)
            .edge(p(1), prod(1), EdgeKind::Produce)
            .edge(prod(1), p(1), EdgeKind::Consume)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        assert_eq!(plan.cycles, vec![vec![p(1), prod(1)]]);
    }

    #[test]
    fn missing_record_halts_only_its_component() {
        let g = Builder::new()
            .process(1, 1)
            .process(3, 3)
            .process(4, 4)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(3), p(4), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();

        assert_eq!(
            plan.errors,
            vec![PropagationError::NodeEmissionMissing { node: p(2) }]
        );
        assert_eq!(plan.skipped, vec![p(1)]);
        assert_eq!(plan.states[&p(2)], NodeState::Uninitialized);
        assert_eq!(value_of(&plan, p(4)), Some(q(7)));
    }

    #[test]
    fn forward_scope_reads_upstream_from_ledger() {
        // Stored cumulative of process 1 is 50 even though direct is 10: the
        // forward run must trust the stored value, not recompute it.
        let g = Builder::new()
            .process_with(1, 10, 50)
            .process(2, 5)
            .process(3, 1)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(2), p(3), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::Forward(vec![p(2)])).unwrap();
        assert_eq!(value_of(&plan, p(1)), None);
        assert_eq!(value_of(&plan, p(2)), Some(q(55)));
        assert_eq!(value_of(&plan, p(3)), Some(q(56)));
    }

    #[test]
    fn forward_scope_with_unknown_seed_is_empty() {
        let g = Builder::new().process(1, 1).build();
        let plan = propagate(&g, &Scope::Forward(vec![p(9)])).unwrap();
        assert!(plan.writes.is_empty());
        assert!(plan.states.is_empty());
    }

    #[test]
    fn plan_is_idempotent() {
        let g = Builder::new()
            .process(1, 10)
            .process(2, 15)
            .product(1, 100, 20, 10)
            .process(3, 2)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(2), prod(1), EdgeKind::Produce)
            .edge(prod(1), p(3), EdgeKind::Consume)
            .build();
        let first = propagate(&g, &Scope::All).unwrap();
        let second = propagate(&g, &Scope::All).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn into_result_reports_unwritten_nodes() {
        let g = Builder::new()
            .process(1, 1)
            .process(2, 2)
            .edge(p(1), p(2), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();
        let result = plan.into_result(1);
        assert!(result.timed_out);
        assert_eq!(result.updated_node_count, 1);
        assert_eq!(
            result.errors,
            vec![PropagationError::DeadlineExceeded { node: p(2) }]
        );
    }

    #[test]
    fn overflow_halts_only_its_component() {
        let half = i64::MAX / 2 + 1;
        let g = Builder::new()
            .process_raw(1, half)
            .process_raw(2, half)
            .process(3, 1)
            .process(4, 1)
            .edge(p(1), p(2), EdgeKind::Continue)
            .edge(p(3), p(4), EdgeKind::Continue)
            .build();
        let plan = propagate(&g, &Scope::All).unwrap();

        assert_eq!(plan.errors, vec![PropagationError::Overflow { node: p(2) }]);
        // Process 1 computed fine but shares the failing component.
        assert_eq!(value_of(&plan, p(1)), None);
        assert_eq!(plan.skipped, vec![p(1)]);
        assert_eq!(plan.states[&p(2)], NodeState::Direct);
        assert_eq!(value_of(&plan, p(3)), Some(q(1)));
        assert_eq!(value_of(&plan, p(4)), Some(q(2)));
    }

    /// Fan-in inputs together with a permutation of their indices.
    fn directs_and_order() -> impl Strategy<Value = (Vec<i64>, Vec<usize>)> {
        proptest::collection::vec(0i64..1_000_000, 1..8).prop_flat_map(|directs| {
            let indices: Vec<usize> = (0..directs.len()).collect();
            (Just(directs), Just(indices).prop_shuffle())
        })
    }

    proptest! {
        /// Fan-in results do not depend on the order edges were added.
        #[test]
        fn fan_in_is_order_independent((directs, shuffled) in directs_and_order()) {
            let target = directs.len() as i64 + 1;
            let build = |order: &[usize]| {
                let mut b = Builder::new().process(target, 3);
                for (i, d) in directs.iter().enumerate() {
                    b = b.process(i as i64 + 1, *d);
                }
                for &i in order {
                    b = b.edge(p(i as i64 + 1), p(target), EdgeKind::Continue);
                }
                b.build()
            };

            let forward: Vec<usize> = (0..directs.len()).collect();
            let a = propagate(&build(&forward), &Scope::All).unwrap();
            let b = propagate(&build(&shuffled), &Scope::All).unwrap();
            let expected = Quantity::checked_sum(directs.iter().map(|d| q(*d))).unwrap()
                .checked_add(q(3)).unwrap();
            prop_assert_eq!(value_of(&a, p(target)), Some(expected));
            prop_assert_eq!(value_of(&a, p(target)), value_of(&b, p(target)));
        }
    }
}
