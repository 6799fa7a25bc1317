//! The storage contracts for edges and emission records.
//!
//! - [`EdgeStore`]: directed, typed edges between processes and products.
//! - [`ProcessEmissionStore`] and [`ProductEmissionStore`]: the emission
//!   ledger, one record per process and per product.
//! - [`Ledger`]: everything a propagation run needs, implemented for any
//!   type providing the three stores.
//!
//! All backends (InMemoryStore, SqliteStore) implement these traits, so they
//! are fully swappable without changing the engine or the service. The
//! traits are synchronous: callers on an async runtime offload to a
//! blocking thread.

use cbam_core::edge::{Edge, EdgeKind, EdgeUpdate, NewEdge};
use cbam_core::emission::{ProcessEmission, ProductAmounts, ProductEmission};
use cbam_core::id::{EdgeId, ProcessId, ProductId};
use cbam_core::node::{NodeKind, NodeRef};
use cbam_core::quantity::Quantity;

use crate::error::StorageError;
use crate::types::EdgeFilter;

/// Durable store of typed edges.
pub trait EdgeStore {
    /// Persists a new edge and returns it with its assigned id and
    /// timestamps. Self-loops and mismatched endpoint kinds are rejected.
    fn create_edge(&mut self, edge: NewEdge) -> Result<Edge, StorageError>;

    fn get_edge(&self, id: EdgeId) -> Result<Edge, StorageError>;

    /// Applies a partial update and returns the edge as stored afterwards.
    fn update_edge(&mut self, id: EdgeId, update: EdgeUpdate) -> Result<Edge, StorageError>;

    /// Removes an edge, returning it as it was before deletion.
    fn delete_edge(&mut self, id: EdgeId) -> Result<Edge, StorageError>;

    /// Edges matching `filter`, ordered by id.
    fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, StorageError>;

    fn list_outgoing(&self, node: NodeRef) -> Result<Vec<Edge>, StorageError> {
        self.list_edges(&EdgeFilter::outgoing(node))
    }

    fn list_incoming(&self, node: NodeRef) -> Result<Vec<Edge>, StorageError> {
        self.list_edges(&EdgeFilter::incoming(node))
    }

    /// The lowest-id edge with exactly these endpoints and kind, if any.
    fn find_edge(
        &self,
        source: NodeRef,
        target: NodeRef,
        kind: EdgeKind,
    ) -> Result<Option<Edge>, StorageError> {
        let filter = EdgeFilter {
            kind: Some(kind),
            source: Some(source),
            target: Some(target),
            node: None,
        };
        Ok(self.list_edges(&filter)?.into_iter().next())
    }
}

/// Emission records of processes.
pub trait ProcessEmissionStore {
    fn get_process_emission(&self, id: ProcessId) -> Result<ProcessEmission, StorageError>;

    /// Sets the externally computed direct emission, creating the record
    /// (with cumulative equal to direct) if it does not exist yet. An
    /// existing cumulative value is left for the engine to recompute.
    fn set_process_direct(
        &mut self,
        id: ProcessId,
        direct: Quantity,
    ) -> Result<ProcessEmission, StorageError>;

    /// Writes an engine-computed cumulative emission in its own transaction.
    /// Fails with [`StorageError::ProcessNotFound`] if the record is gone.
    fn write_process_cumulative(
        &mut self,
        id: ProcessId,
        value: Quantity,
    ) -> Result<(), StorageError>;

    /// All process records, ordered by id.
    fn list_process_emissions(&self) -> Result<Vec<ProcessEmission>, StorageError>;
}

/// Emission and mass-balance records of products.
pub trait ProductEmissionStore {
    fn get_product_emission(&self, id: ProductId) -> Result<ProductEmission, StorageError>;

    /// Sets the externally maintained fields, creating the record (with
    /// allocated equal to direct) if it does not exist yet.
    fn set_product_amounts(
        &mut self,
        id: ProductId,
        amounts: ProductAmounts,
    ) -> Result<ProductEmission, StorageError>;

    /// Writes an engine-computed allocated emission in its own transaction.
    /// Fails with [`StorageError::ProductNotFound`] if the record is gone.
    fn write_product_allocated(
        &mut self,
        id: ProductId,
        value: Quantity,
    ) -> Result<(), StorageError>;

    /// All product records, ordered by id.
    fn list_product_emissions(&self) -> Result<Vec<ProductEmission>, StorageError>;
}

/// Edge store plus emission ledger.
pub trait Ledger: EdgeStore + ProcessEmissionStore + ProductEmissionStore {
    /// Writes the engine-owned value of `node`.
    fn write_propagated(&mut self, node: NodeRef, value: Quantity) -> Result<(), StorageError> {
        match node.kind {
            NodeKind::Process => self.write_process_cumulative(ProcessId(node.id), value),
            NodeKind::Product => self.write_product_allocated(ProductId(node.id), value),
        }
    }
}

impl<T> Ledger for T where T: EdgeStore + ProcessEmissionStore + ProductEmissionStore {}
