//! Graph Loader: materializes an [`EmissionGraph`] for one propagation run.
//!
//! Reads are batched: one query for all edges and one per emission table,
//! never one query per node. Nodes that appear in an edge without a ledger
//! record end up in the graph without a snapshot; the engine reports them.

use cbam_core::graph::EmissionGraph;

use crate::error::StorageError;
use crate::traits::Ledger;
use crate::types::EdgeFilter;

/// Loads every edge and emission record from `store` into a new graph.
pub fn load_graph<S: Ledger + ?Sized>(store: &S) -> Result<EmissionGraph, StorageError> {
    let edges = store.list_edges(&EdgeFilter::default())?;
    let processes = store.list_process_emissions()?;
    let products = store.list_product_emissions()?;

    let mut graph = EmissionGraph::new();
    for record in processes {
        graph.add_process(record);
    }
    for record in products {
        graph.add_product(record);
    }
    for edge in &edges {
        graph.add_edge(edge)?;
    }

    tracing::debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        missing = graph.missing_records().len(),
        "emission graph loaded"
    );
    Ok(graph)
}
