//! EmissionService: the recalculation coordinator between callers (HTTP
//! handlers, the CLI) and the storage and engine crates.
//!
//! Every mutation that can change a propagated value (edge create, update or
//! delete, a leaf emission update) is followed by an incremental run over the
//! forward-reachable subgraph of the affected nodes. [`recompute_graph`]
//! rebuilds every value from base case.
//!
//! A run loads the graph once, plans it in memory with
//! [`cbam_core::propagate`], then writes the plan node by node. Each write
//! is its own transaction, so a run stopped by its deadline keeps the
//! writes it completed.
//!
//! [`recompute_graph`]: EmissionService::recompute_graph

use std::time::Instant;

use cbam_core::chain::{chain_summary, ChainSummary};
use cbam_core::edge::{Edge, EdgeKind, EdgeUpdate, NewEdge};
use cbam_core::emission::{ProcessEmission, ProductAmounts, ProductEmission};
use cbam_core::graph::EmissionGraph;
use cbam_core::id::{EdgeId, ProcessId, ProductId};
use cbam_core::node::NodeRef;
use cbam_core::propagation::{propagate, PropagationPlan, Scope};
use cbam_core::quantity::Quantity;
use cbam_core::result::PropagationResult;
use cbam_core::validate::{validate_ledger, InvariantViolation};
use cbam_storage::{load_graph, EdgeFilter, Ledger, SqliteStore, StorageError};

use crate::error::ApiError;

/// Options of a full or triggered recalculation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecomputeOptions {
    /// Recompute forward of this edge's target only.
    pub trigger_edge: Option<EdgeId>,
    /// Check the ledger invariants after writing.
    pub include_validation: bool,
    /// Stop writing once this instant has passed.
    pub deadline: Option<Instant>,
}

/// Outcome of [`EmissionService::recompute_graph`].
#[derive(Debug, Clone, Default)]
pub struct RecomputeReport {
    pub result: PropagationResult,
    /// Present when validation was requested.
    pub violations: Option<Vec<InvariantViolation>>,
}

/// The recalculation coordinator.
///
/// Generic over the [`Ledger`] backend; the server runs it over
/// [`SqliteStore`], tests also over `InMemoryStore`.
pub struct EmissionService<S> {
    store: S,
}

impl EmissionService<SqliteStore> {
    /// Opens the ledger database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self, ApiError> {
        let store = SqliteStore::new(db_path)
            .map_err(|e| ApiError::InternalError(format!("failed to open database: {}", e)))?;
        Ok(EmissionService { store })
    }

    /// Uses an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, ApiError> {
        let store = SqliteStore::in_memory()
            .map_err(|e| ApiError::InternalError(format!("failed to open test db: {}", e)))?;
        Ok(EmissionService { store })
    }
}

impl<S: Ledger> EmissionService<S> {
    pub fn with_store(store: S) -> Self {
        EmissionService { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Edge CRUD
    // -----------------------------------------------------------------------

    /// Persists an edge and propagates forward of its target.
    pub fn create_edge(&mut self, edge: NewEdge) -> Result<(Edge, PropagationResult), ApiError> {
        let created = self.store.create_edge(edge)?;
        tracing::info!(edge = %created.id, kind = %created.kind, source = %created.source, target = %created.target, "edge created");
        let result = self.propagate_forward(vec![created.target], None)?;
        Ok((created, result))
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<Edge, ApiError> {
        Ok(self.store.get_edge(id)?)
    }

    pub fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, ApiError> {
        Ok(self.store.list_edges(filter)?)
    }

    /// Updates an edge and propagates forward of both its old and new target.
    pub fn update_edge(
        &mut self,
        id: EdgeId,
        update: EdgeUpdate,
    ) -> Result<(Edge, PropagationResult), ApiError> {
        let before = self.store.get_edge(id)?;
        let after = self.store.update_edge(id, update)?;
        tracing::info!(edge = %id, "edge updated");

        // Detaching the old endpoints may unblock a component that a missing
        // record was holding back, so those are recomputed whole.
        let result =
            self.propagate_reopening(vec![after.target], &[before.source, before.target])?;
        Ok((after, result))
    }

    /// Deletes an edge and recomputes the components of both former
    /// endpoints. The target no longer receives the edge's contribution, and
    /// a split may free nodes that a missing record was holding back.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<(Edge, PropagationResult), ApiError> {
        let deleted = self.store.delete_edge(id)?;
        tracing::info!(edge = %id, "edge deleted");
        let result = self.propagate_reopening(Vec::new(), &[deleted.source, deleted.target])?;
        Ok((deleted, result))
    }

    // -----------------------------------------------------------------------
    // Propagation triggers
    // -----------------------------------------------------------------------

    /// Recomputes the subgraph forward-reachable from the edge's target.
    /// Upstream values are taken as already finalized.
    pub fn propagate_from_edge(&mut self, id: EdgeId) -> Result<PropagationResult, ApiError> {
        let edge = self.store.get_edge(id)?;
        self.propagate_forward(vec![edge.target], None)
    }

    /// Ensures a `continue` edge between two processes exists, then
    /// propagates from it. Returns the edge and whether it was created.
    pub fn propagate_between(
        &mut self,
        source: ProcessId,
        target: ProcessId,
    ) -> Result<(Edge, bool, PropagationResult), ApiError> {
        let source = NodeRef::process(source);
        let target = NodeRef::process(target);
        let existing = self.store.find_edge(source, target, EdgeKind::Continue)?;
        let (edge, created) = match existing {
            Some(edge) => (edge, false),
            None => {
                let new_edge = NewEdge::new(source, target, EdgeKind::Continue)?;
                (self.store.create_edge(new_edge)?, true)
            }
        };
        let result = self.propagate_forward(vec![edge.target], None)?;
        Ok((edge, created, result))
    }

    /// Recomputes the whole graph from base case, or forward of a trigger
    /// edge. Running it twice without intervening changes writes identical
    /// values.
    pub fn recompute_graph(
        &mut self,
        options: &RecomputeOptions,
    ) -> Result<RecomputeReport, ApiError> {
        let scope = match options.trigger_edge {
            Some(id) => Scope::Forward(vec![self.store.get_edge(id)?.target]),
            None => Scope::All,
        };
        let started = Instant::now();
        let result = self.run(&scope, options.deadline)?;

        let violations = if options.include_validation {
            let graph = load_graph(&self.store)?;
            let violations = validate_ledger(&graph, &result.cycles_detected);
            if !violations.is_empty() {
                tracing::warn!(count = violations.len(), "ledger invariant violations after recompute");
            }
            Some(violations)
        } else {
            None
        };

        tracing::info!(
            updated = result.updated_node_count,
            cycles = result.cycles_detected.len(),
            errors = result.errors.len(),
            timed_out = result.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph recomputed"
        );
        Ok(RecomputeReport { result, violations })
    }

    // -----------------------------------------------------------------------
    // Leaf emission updates
    // -----------------------------------------------------------------------

    /// Sets a process's direct emission and propagates forward of it. A new
    /// record recomputes its whole component, which a missing record may have
    /// been holding back.
    pub fn set_process_direct(
        &mut self,
        id: ProcessId,
        direct: Quantity,
    ) -> Result<(ProcessEmission, PropagationResult), ApiError> {
        let existed = match self.store.get_process_emission(id) {
            Ok(_) => true,
            Err(StorageError::ProcessNotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        self.store.set_process_direct(id, direct)?;
        let result = self.propagate_leaf(NodeRef::process(id), existed)?;
        Ok((self.store.get_process_emission(id)?, result))
    }

    /// Sets a product's amounts and propagates like
    /// [`set_process_direct`](Self::set_process_direct).
    pub fn set_product_amounts(
        &mut self,
        id: ProductId,
        amounts: ProductAmounts,
    ) -> Result<(ProductEmission, PropagationResult), ApiError> {
        let existed = match self.store.get_product_emission(id) {
            Ok(_) => true,
            Err(StorageError::ProductNotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        self.store.set_product_amounts(id, amounts)?;
        let result = self.propagate_leaf(NodeRef::product(id), existed)?;
        Ok((self.store.get_product_emission(id)?, result))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn process_emission(&self, id: ProcessId) -> Result<ProcessEmission, ApiError> {
        Ok(self.store.get_process_emission(id)?)
    }

    pub fn product_emission(&self, id: ProductId) -> Result<ProductEmission, ApiError> {
        Ok(self.store.get_product_emission(id)?)
    }

    /// Summary of the linear `continue` chain starting at `start`.
    pub fn chain_summary(&self, start: ProcessId) -> Result<ChainSummary, ApiError> {
        let graph = load_graph(&self.store)?;
        Ok(chain_summary(&graph, start)?)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn propagate_forward(
        &mut self,
        seeds: Vec<NodeRef>,
        deadline: Option<Instant>,
    ) -> Result<PropagationResult, ApiError> {
        self.run(&Scope::Forward(seeds), deadline)
    }

    fn propagate_leaf(&mut self, node: NodeRef, existed: bool) -> Result<PropagationResult, ApiError> {
        if existed {
            self.propagate_forward(vec![node], None)
        } else {
            self.propagate_reopening(Vec::new(), &[node])
        }
    }

    /// Forward run from `seeds`, widened to the whole connected component of
    /// every `reopened` node.
    fn propagate_reopening(
        &mut self,
        mut seeds: Vec<NodeRef>,
        reopened: &[NodeRef],
    ) -> Result<PropagationResult, ApiError> {
        let graph = load_graph(&self.store)?;
        for &node in reopened {
            seeds.extend(graph.component_of(node));
        }
        seeds.sort();
        seeds.dedup();
        self.run_on(&graph, &Scope::Forward(seeds), None)
    }

    fn run(&mut self, scope: &Scope, deadline: Option<Instant>) -> Result<PropagationResult, ApiError> {
        let graph = load_graph(&self.store)?;
        self.run_on(&graph, scope, deadline)
    }

    fn run_on(
        &mut self,
        graph: &EmissionGraph,
        scope: &Scope,
        deadline: Option<Instant>,
    ) -> Result<PropagationResult, ApiError> {
        let plan = propagate(graph, scope)?;
        tracing::debug!(
            planned = plan.writes.len(),
            changed = plan.changed_count(),
            "propagation planned"
        );
        if !plan.cycles.is_empty() {
            tracing::warn!(cycles = ?plan.cycles, "cycles excluded from propagation");
        }
        for error in &plan.errors {
            tracing::warn!(%error, "propagation incomplete");
        }
        self.apply_plan(plan, deadline)
    }

    /// Writes the plan in order until done or until the deadline passes.
    fn apply_plan(
        &mut self,
        plan: PropagationPlan,
        deadline: Option<Instant>,
    ) -> Result<PropagationResult, ApiError> {
        let mut written = 0;
        for write in &plan.writes {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    written,
                    remaining = plan.writes.len() - written,
                    "propagation deadline exceeded"
                );
                break;
            }
            self.store.write_propagated(write.node, write.value)?;
            written += 1;
        }
        Ok(plan.into_result(written))
    }
}
