pub mod chain;
pub mod edge;
pub mod emission;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod propagation;
pub mod quantity;
pub mod result;
pub mod validate;

// Re-export commonly used types
pub use chain::{chain_summary, ChainEnd, ChainSummary};
pub use edge::{Edge, EdgeKind, EdgeUpdate, NewEdge};
pub use emission::{
    validate_direct_emission, EmissionSnapshot, ProcessEmission, ProductAmounts, ProductEmission,
};
pub use error::CoreError;
pub use graph::{Adjacent, EdgeRecord, EmissionGraph};
pub use id::{EdgeId, ProcessId, ProductId};
pub use node::{NodeKind, NodeRef, NodeState};
pub use propagation::{propagate, PropagationPlan, Scope};
pub use quantity::{Quantity, SCALE};
pub use result::{NodeWrite, PropagationError, PropagationResult};
pub use validate::{validate_ledger, InvariantViolation, ViolationKind};
