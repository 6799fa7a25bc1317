//! Emission ledger records.
//!
//! [`ProcessEmission`] and [`ProductEmission`] mirror one ledger row each.
//! Leaf fields (`direct_emission`, amounts) are maintained by the external
//! leaf calculation; `cumulative_emission` and `allocated_emission` are
//! written only by the propagation engine.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{ProcessId, ProductId};
use crate::node::NodeRef;
use crate::quantity::Quantity;

/// Emission record of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEmission {
    pub process_id: ProcessId,
    pub direct_emission: Quantity,
    pub cumulative_emission: Quantity,
}

impl ProcessEmission {
    /// A fresh record in its base case: cumulative equals direct.
    pub fn new(process_id: ProcessId, direct_emission: Quantity) -> Self {
        ProcessEmission {
            process_id,
            direct_emission,
            cumulative_emission: direct_emission,
        }
    }

    pub fn node(&self) -> NodeRef {
        NodeRef::process(self.process_id)
    }
}

/// Emission and mass-balance record of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEmission {
    pub product_id: ProductId,
    /// Externally attributed emission (e.g. a purchased precursor). Zero for
    /// products that only receive emission through `produce` edges.
    pub direct_emission: Quantity,
    pub allocated_emission: Quantity,
    pub produced_amount: Quantity,
    pub sold_amount: Quantity,
    pub eu_sold_amount: Quantity,
}

impl ProductEmission {
    /// A fresh record with no emission and the given amounts.
    pub fn new(product_id: ProductId, amounts: ProductAmounts) -> Self {
        ProductEmission {
            product_id,
            direct_emission: amounts.direct_emission,
            allocated_emission: amounts.direct_emission,
            produced_amount: amounts.produced_amount,
            sold_amount: amounts.sold_amount,
            eu_sold_amount: amounts.eu_sold_amount,
        }
    }

    pub fn node(&self) -> NodeRef {
        NodeRef::product(self.product_id)
    }

    pub fn amounts(&self) -> ProductAmounts {
        ProductAmounts {
            direct_emission: self.direct_emission,
            produced_amount: self.produced_amount,
            sold_amount: self.sold_amount,
            eu_sold_amount: self.eu_sold_amount,
        }
    }

    /// `produced - sold - eu_sold`, floored at zero.
    pub fn amount_to_next_stage(&self) -> Quantity {
        self.produced_amount
            .saturating_sub_floor_zero(self.sold_amount)
            .saturating_sub_floor_zero(self.eu_sold_amount)
    }

    /// The emission one `consume` edge carries out of this product:
    /// `allocated * amount_to_next_stage / produced` (zero when nothing was
    /// produced).
    pub fn consume_contribution(&self) -> Result<Quantity, CoreError> {
        self.allocated_emission
            .scale_by(self.amount_to_next_stage(), self.produced_amount)
    }
}

/// The externally maintained fields of a product record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAmounts {
    #[serde(default)]
    pub direct_emission: Quantity,
    pub produced_amount: Quantity,
    #[serde(default)]
    pub sold_amount: Quantity,
    #[serde(default)]
    pub eu_sold_amount: Quantity,
}

impl ProductAmounts {
    /// Rejects negative leaf values.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("direct_emission", self.direct_emission),
            ("produced_amount", self.produced_amount),
            ("sold_amount", self.sold_amount),
            ("eu_sold_amount", self.eu_sold_amount),
        ] {
            if value.is_negative() {
                return Err(CoreError::InvalidQuantity {
                    reason: format!("{name} must be >= 0, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Rejects a negative direct emission.
pub fn validate_direct_emission(value: Quantity) -> Result<(), CoreError> {
    if value.is_negative() {
        return Err(CoreError::InvalidQuantity {
            reason: format!("direct_emission must be >= 0, got {value}"),
        });
    }
    Ok(())
}

/// The ledger snapshot of one node, as loaded for a propagation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EmissionSnapshot {
    Process(ProcessEmission),
    Product(ProductEmission),
}

impl EmissionSnapshot {
    /// The engine-owned value: cumulative for processes, allocated for products.
    pub fn propagated_value(&self) -> Quantity {
        match self {
            EmissionSnapshot::Process(p) => p.cumulative_emission,
            EmissionSnapshot::Product(p) => p.allocated_emission,
        }
    }

    /// The externally owned base value the engine starts from.
    pub fn base_value(&self) -> Quantity {
        match self {
            EmissionSnapshot::Process(p) => p.direct_emission,
            EmissionSnapshot::Product(p) => p.direct_emission,
        }
    }
}
