//! Quantity and cost arithmetic for stock-in and stock-out

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places kept on per-unit costs
pub const COST_SCALE: u32 = 6;

/// Decimal places kept on posted money amounts
pub const MONEY_SCALE: u32 = 2;

/// Per-product unit table: one `unit` equals `factor` base units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitConversions(pub HashMap<String, Decimal>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("unit '{0}' has no conversion factor for this product")]
    UnknownUnit(String),

    #[error("conversion factor for unit '{0}' must be positive")]
    InvalidFactor(String),
}

/// Quantity and unit cost expressed in the product's base unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseQuantity {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl UnitConversions {
    pub fn factor(&self, unit: &str) -> Option<Decimal> {
        self.0.get(unit).copied()
    }

    /// Convert an entry-unit quantity and cost into base units.
    ///
    /// No unit, or the base unit itself, passes through unchanged.
    pub fn to_base(
        &self,
        base_unit: &str,
        unit: Option<&str>,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> Result<BaseQuantity, UnitError> {
        let unit = match unit.map(str::trim) {
            None => return Ok(BaseQuantity { quantity, unit_cost }),
            Some(u) if u.is_empty() || u == base_unit => {
                return Ok(BaseQuantity { quantity, unit_cost })
            }
            Some(u) => u,
        };

        let factor = self
            .factor(unit)
            .ok_or_else(|| UnitError::UnknownUnit(unit.to_string()))?;
        if factor <= Decimal::ZERO {
            return Err(UnitError::InvalidFactor(unit.to_string()));
        }

        Ok(BaseQuantity {
            quantity: quantity * factor,
            unit_cost: (unit_cost / factor).round_dp(COST_SCALE),
        })
    }
}

/// Moving weighted-average cost after receiving `add_qty` at `add_cost`.
///
/// Falls back to the incoming cost when the resulting stock is not positive.
pub fn weighted_average_cost(
    old_qty: Decimal,
    old_cost: Decimal,
    add_qty: Decimal,
    add_cost: Decimal,
) -> Decimal {
    let total = old_qty + add_qty;
    if total <= Decimal::ZERO {
        return add_cost;
    }
    ((old_qty * old_cost + add_qty * add_cost) / total).round_dp(COST_SCALE)
}

/// Money value of `quantity` at `unit_cost`, rounded for posting
pub fn extended_value(quantity: Decimal, unit_cost: Decimal) -> Decimal {
    (quantity.abs() * unit_cost).round_dp(MONEY_SCALE)
}

/// Serialized units are counted one-per-base-unit
pub fn serial_count_matches(quantity: Decimal, serials: usize) -> bool {
    quantity.fract().is_zero() && quantity == Decimal::from(serials)
}
