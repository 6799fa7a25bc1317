//! In-memory implementation of the storage traits.
//!
//! [`InMemoryStore`] is a first-class backend for tests and ephemeral
//! servers. It keeps everything in BTreeMaps so iteration order matches the
//! `ORDER BY id` of the SQLite backend, with identical semantics otherwise.

use std::collections::BTreeMap;

use chrono::Utc;

use cbam_core::edge::{Edge, EdgeUpdate, NewEdge};
use cbam_core::emission::{
    validate_direct_emission, ProcessEmission, ProductAmounts, ProductEmission,
};
use cbam_core::id::{EdgeId, ProcessId, ProductId};
use cbam_core::quantity::Quantity;

use crate::error::StorageError;
use crate::traits::{EdgeStore, ProcessEmissionStore, ProductEmissionStore};
use crate::types::EdgeFilter;

/// In-memory backend for edges and the emission ledger.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    edges: BTreeMap<EdgeId, Edge>,
    next_edge_id: i64,
    processes: BTreeMap<ProcessId, ProcessEmission>,
    products: BTreeMap<ProductId, ProductEmission>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            edges: BTreeMap::new(),
            next_edge_id: 1,
            processes: BTreeMap::new(),
            products: BTreeMap::new(),
        }
    }

    /// Removes a process record. Edges referencing it are left in place.
    pub fn remove_process_emission(&mut self, id: ProcessId) -> Option<ProcessEmission> {
        self.processes.remove(&id)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeStore for InMemoryStore {
    fn create_edge(&mut self, edge: NewEdge) -> Result<Edge, StorageError> {
        edge.kind.validate_endpoints(edge.source, edge.target)?;
        let now = Utc::now();
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        let stored = Edge {
            id,
            source: edge.source,
            target: edge.target,
            kind: edge.kind,
            created_at: now,
            updated_at: now,
        };
        self.edges.insert(id, stored.clone());
        Ok(stored)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Edge, StorageError> {
        self.edges
            .get(&id)
            .cloned()
            .ok_or(StorageError::EdgeNotFound(id))
    }

    fn update_edge(&mut self, id: EdgeId, update: EdgeUpdate) -> Result<Edge, StorageError> {
        let current = self
            .edges
            .get_mut(&id)
            .ok_or(StorageError::EdgeNotFound(id))?;
        let updated = update.apply(current, Utc::now())?;
        *current = updated.clone();
        Ok(updated)
    }

    fn delete_edge(&mut self, id: EdgeId) -> Result<Edge, StorageError> {
        self.edges.remove(&id).ok_or(StorageError::EdgeNotFound(id))
    }

    fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, StorageError> {
        Ok(self
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}

impl ProcessEmissionStore for InMemoryStore {
    fn get_process_emission(&self, id: ProcessId) -> Result<ProcessEmission, StorageError> {
        self.processes
            .get(&id)
            .copied()
            .ok_or(StorageError::ProcessNotFound(id))
    }

    fn set_process_direct(
        &mut self,
        id: ProcessId,
        direct: Quantity,
    ) -> Result<ProcessEmission, StorageError> {
        validate_direct_emission(direct)?;
        let record = self
            .processes
            .entry(id)
            .and_modify(|r| r.direct_emission = direct)
            .or_insert_with(|| ProcessEmission::new(id, direct));
        Ok(*record)
    }

    fn write_process_cumulative(
        &mut self,
        id: ProcessId,
        value: Quantity,
    ) -> Result<(), StorageError> {
        let record = self
            .processes
            .get_mut(&id)
            .ok_or(StorageError::ProcessNotFound(id))?;
        record.cumulative_emission = value;
        Ok(())
    }

    fn list_process_emissions(&self) -> Result<Vec<ProcessEmission>, StorageError> {
        Ok(self.processes.values().copied().collect())
    }
}

impl ProductEmissionStore for InMemoryStore {
    fn get_product_emission(&self, id: ProductId) -> Result<ProductEmission, StorageError> {
        self.products
            .get(&id)
            .copied()
            .ok_or(StorageError::ProductNotFound(id))
    }

    fn set_product_amounts(
        &mut self,
        id: ProductId,
        amounts: ProductAmounts,
    ) -> Result<ProductEmission, StorageError> {
        amounts.validate()?;
        let record = self
            .products
            .entry(id)
            .and_modify(|r| {
                r.direct_emission = amounts.direct_emission;
                r.produced_amount = amounts.produced_amount;
                r.sold_amount = amounts.sold_amount;
                r.eu_sold_amount = amounts.eu_sold_amount;
            })
            .or_insert_with(|| ProductEmission::new(id, amounts));
        Ok(*record)
    }

    fn write_product_allocated(
        &mut self,
        id: ProductId,
        value: Quantity,
    ) -> Result<(), StorageError> {
        let record = self
            .products
            .get_mut(&id)
            .ok_or(StorageError::ProductNotFound(id))?;
        record.allocated_emission = value;
        Ok(())
    }

    fn list_product_emissions(&self) -> Result<Vec<ProductEmission>, StorageError> {
        Ok(self.products.values().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbam_core::edge::EdgeKind;
    use cbam_core::error::CoreError;
    use cbam_core::node::NodeRef;
    use crate::traits::Ledger;

    fn p(id: i64) -> NodeRef {
        NodeRef::process(ProcessId(id))
    }

    fn q(units: i64) -> Quantity {
        Quantity::from_units(units).unwrap()
    }

    #[test]
    fn edge_crud() {
        let mut store = InMemoryStore::new();
        let edge = store
            .create_edge(NewEdge::new(p(1), p(2), EdgeKind::Continue).unwrap())
            .unwrap();
        assert_eq!(edge.id, EdgeId(1));
        assert_eq!(store.get_edge(edge.id).unwrap(), edge);

        let moved = store
            .update_edge(
                edge.id,
                EdgeUpdate {
                    target: Some(p(3)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.target, p(3));
        assert_eq!(moved.created_at, edge.created_at);

        assert_eq!(store.list_incoming(p(3)).unwrap().len(), 1);
        assert!(store.list_incoming(p(2)).unwrap().is_empty());

        let deleted = store.delete_edge(edge.id).unwrap();
        assert_eq!(deleted.target, p(3));
        assert!(matches!(
            store.get_edge(edge.id),
            Err(StorageError::EdgeNotFound(_))
        ));
    }

    #[test]
    fn create_rejects_self_loop() {
        let mut store = InMemoryStore::new();
        let raw = NewEdge {
            source: p(1),
            target: p(1),
            kind: EdgeKind::Continue,
        };
        assert!(matches!(
            store.create_edge(raw),
            Err(StorageError::Core(CoreError::SelfLoop { .. }))
        ));
        assert!(store.list_edges(&EdgeFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn update_rejects_self_loop_and_keeps_edge() {
        let mut store = InMemoryStore::new();
        let edge = store
            .create_edge(NewEdge::new(p(1), p(2), EdgeKind::Continue).unwrap())
            .unwrap();
        let result = store.update_edge(
            edge.id,
            EdgeUpdate {
                source: Some(p(2)),
                ..Default::default()
            },
        );
        assert!(result.is_err());
        assert_eq!(store.get_edge(edge.id).unwrap(), edge);
    }

    #[test]
    fn find_edge_returns_lowest_id() {
        let mut store = InMemoryStore::new();
        let first = store
            .create_edge(NewEdge::new(p(1), p(2), EdgeKind::Continue).unwrap())
            .unwrap();
        store
            .create_edge(NewEdge::new(p(1), p(2), EdgeKind::Continue).unwrap())
            .unwrap();
        let found = store.find_edge(p(1), p(2), EdgeKind::Continue).unwrap();
        assert_eq!(found.map(|e| e.id), Some(first.id));
        assert!(store
            .find_edge(p(2), p(1), EdgeKind::Continue)
            .unwrap()
            .is_none());
    }

    #[test]
    fn process_direct_upsert_keeps_cumulative() {
        let mut store = InMemoryStore::new();
        let created = store.set_process_direct(ProcessId(1), q(10)).unwrap();
        assert_eq!(created.cumulative_emission, q(10));

        store.write_process_cumulative(ProcessId(1), q(30)).unwrap();
        let updated = store.set_process_direct(ProcessId(1), q(12)).unwrap();
        assert_eq!(updated.direct_emission, q(12));
        assert_eq!(updated.cumulative_emission, q(30));

        assert!(store.set_process_direct(ProcessId(2), Quantity(-1)).is_err());
    }

    #[test]
    fn writes_to_missing_records_fail() {
        let mut store = InMemoryStore::new();
        assert!(matches!(
            store.write_process_cumulative(ProcessId(9), q(1)),
            Err(StorageError::ProcessNotFound(_))
        ));
        assert!(matches!(
            store.write_propagated(NodeRef::product(ProductId(9)), q(1)),
            Err(StorageError::ProductNotFound(_))
        ));
    }

    #[test]
    fn product_amounts_upsert() {
        let mut store = InMemoryStore::new();
        let amounts = ProductAmounts {
            produced_amount: q(100),
            sold_amount: q(20),
            ..Default::default()
        };
        store.set_product_amounts(ProductId(1), amounts).unwrap();
        store.write_product_allocated(ProductId(1), q(45)).unwrap();

        let record = store.get_product_emission(ProductId(1)).unwrap();
        assert_eq!(record.allocated_emission, q(45));
        assert_eq!(record.amount_to_next_stage(), q(80));
        assert_eq!(store.list_product_emissions().unwrap().len(), 1);
    }
}
