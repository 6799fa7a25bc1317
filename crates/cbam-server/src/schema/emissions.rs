//! Schema types for emission queries, leaf updates and recalculation.

use serde::{Deserialize, Serialize};

use cbam_core::chain::{ChainEnd, ChainSummary};
use cbam_core::emission::{ProcessEmission, ProductAmounts, ProductEmission};
use cbam_core::node::NodeRef;
use cbam_core::result::PropagationResult;
use cbam_core::validate::{InvariantViolation, ViolationKind};

use super::common::parse_quantity;
use crate::concurrency::RunId;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessEmissionView {
    pub process_id: i64,
    pub direct_emission: f64,
    pub cumulative_emission: f64,
}

impl From<ProcessEmission> for ProcessEmissionView {
    fn from(r: ProcessEmission) -> Self {
        ProcessEmissionView {
            process_id: r.process_id.0,
            direct_emission: r.direct_emission.to_f64(),
            cumulative_emission: r.cumulative_emission.to_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductEmissionView {
    pub product_id: i64,
    pub direct_emission: f64,
    pub allocated_emission: f64,
    pub produced_amount: f64,
    pub sold_amount: f64,
    pub eu_sold_amount: f64,
    pub amount_to_next_stage: f64,
}

impl From<ProductEmission> for ProductEmissionView {
    fn from(r: ProductEmission) -> Self {
        ProductEmissionView {
            product_id: r.product_id.0,
            direct_emission: r.direct_emission.to_f64(),
            allocated_emission: r.allocated_emission.to_f64(),
            produced_amount: r.produced_amount.to_f64(),
            sold_amount: r.sold_amount.to_f64(),
            eu_sold_amount: r.eu_sold_amount.to_f64(),
            amount_to_next_stage: r.amount_to_next_stage().to_f64(),
        }
    }
}

/// `PUT /emissions/process/{id}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct SetProcessEmissionRequest {
    pub direct_emission: f64,
}

/// `PUT /emissions/product/{id}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct SetProductEmissionRequest {
    #[serde(default)]
    pub direct_emission: f64,
    pub produced_amount: f64,
    #[serde(default)]
    pub sold_amount: f64,
    #[serde(default)]
    pub eu_sold_amount: f64,
}

impl SetProductEmissionRequest {
    pub fn to_amounts(&self) -> Result<ProductAmounts, ApiError> {
        Ok(ProductAmounts {
            direct_emission: parse_quantity("direct_emission", self.direct_emission)?,
            produced_amount: parse_quantity("produced_amount", self.produced_amount)?,
            sold_amount: parse_quantity("sold_amount", self.sold_amount)?,
            eu_sold_amount: parse_quantity("eu_sold_amount", self.eu_sold_amount)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessEmissionUpdateResponse {
    pub emission: ProcessEmissionView,
    pub propagation: PropagationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductEmissionUpdateResponse {
    pub emission: ProductEmissionView,
    pub propagation: PropagationResult,
}

/// `POST /emissions/graph/recalculate` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecalculateRequest {
    /// Recompute only forward of this edge's target instead of the whole graph.
    pub trigger_edge_id: Option<i64>,
    #[serde(default)]
    pub include_validation: bool,
    /// Stop writing after this many milliseconds.
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationView {
    pub node: NodeRef,
    pub kind: ViolationKind,
    pub direct: f64,
    pub propagated: f64,
}

impl From<InvariantViolation> for ViolationView {
    fn from(v: InvariantViolation) -> Self {
        ViolationView {
            node: v.node,
            kind: v.kind,
            direct: v.direct.to_f64(),
            propagated: v.propagated.to_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalculateResponse {
    pub run_id: RunId,
    #[serde(flatten)]
    pub result: PropagationResult,
    /// Present when validation was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<ViolationView>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainSummaryView {
    pub chain_id: i64,
    pub processes: Vec<i64>,
    pub total_direct_emission: f64,
    pub end_cumulative_emission: f64,
    pub end: ChainEnd,
}

impl From<ChainSummary> for ChainSummaryView {
    fn from(s: ChainSummary) -> Self {
        ChainSummaryView {
            chain_id: s.chain_id.0,
            processes: s.processes.into_iter().map(|p| p.0).collect(),
            total_direct_emission: s.total_direct_emission.to_f64(),
            end_cumulative_emission: s.end_cumulative_emission.to_f64(),
            end: s.end,
        }
    }
}
