//! Storage for the CBAM emission graph.
//!
//! Provides the storage contracts ([`EdgeStore`], [`ProcessEmissionStore`],
//! [`ProductEmissionStore`] and their combination [`Ledger`]), the
//! [`InMemoryStore`] and [`SqliteStore`] backends, and the Graph Loader that
//! turns a store into an in-memory `EmissionGraph`.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: EdgeFilter query type
//! - [`traits`]: store trait definitions
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: connection setup and migrations
//! - [`sqlite`]: SqliteStore implementation
//! - [`loader`]: batched graph loading

pub mod error;
pub mod loader;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use loader::load_graph;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{EdgeStore, Ledger, ProcessEmissionStore, ProductEmissionStore};
pub use types::EdgeFilter;
