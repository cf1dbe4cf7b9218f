//! Batch selection: FEFO consumption plans and reservation holds

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stock::MONEY_SCALE;

/// A batch as seen by the allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCandidate {
    pub batch_id: Uuid,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub cost_price: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl BatchCandidate {
    pub fn unreserved(&self) -> Decimal {
        (self.quantity - self.reserved_quantity).max(Decimal::ZERO)
    }
}

/// Quantity taken from one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDraw {
    pub batch_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl BatchDraw {
    pub fn cost(&self) -> Decimal {
        self.quantity * self.unit_cost
    }
}

/// Outcome of planning an outbound quantity against batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub draws: Vec<BatchDraw>,
    /// Part of the requirement no batch covered
    pub uncovered: Decimal,
    pub uncovered_unit_cost: Decimal,
}

impl AllocationPlan {
    pub fn batch_quantity(&self) -> Decimal {
        self.draws.iter().map(|d| d.quantity).sum()
    }

    /// Cost of goods sold for the whole requirement, rounded for posting
    pub fn cost_of_goods_sold(&self) -> Decimal {
        let batch_cost: Decimal = self.draws.iter().map(BatchDraw::cost).sum();
        (batch_cost + self.uncovered * self.uncovered_unit_cost).round_dp(MONEY_SCALE)
    }
}

/// The target could not cover the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub available: Decimal,
    pub requested: Decimal,
}

/// Expiry ascending with undated batches last, then oldest first
pub fn fefo_order(a: &BatchCandidate, b: &BatchCandidate) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Consume batches front to back; whatever they cannot cover is costed at `fallback_cost`
pub fn plan_fefo(
    candidates: &[BatchCandidate],
    required: Decimal,
    fallback_cost: Decimal,
) -> AllocationPlan {
    let mut ordered: Vec<&BatchCandidate> = candidates
        .iter()
        .filter(|c| c.quantity > Decimal::ZERO)
        .collect();
    ordered.sort_by(|a, b| fefo_order(a, b));

    let mut remaining = required;
    let mut draws = Vec::new();
    for candidate in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = candidate.quantity.min(remaining);
        draws.push(BatchDraw {
            batch_id: candidate.batch_id,
            quantity: take,
            unit_cost: candidate.cost_price,
        });
        remaining -= take;
    }

    AllocationPlan {
        draws,
        uncovered: remaining.max(Decimal::ZERO),
        uncovered_unit_cost: fallback_cost,
    }
}

/// Consume only from `target`; no spill-over into other batches
pub fn plan_exclusive(
    target: &BatchCandidate,
    required: Decimal,
) -> Result<AllocationPlan, Shortfall> {
    if target.quantity < required {
        return Err(Shortfall {
            available: target.quantity,
            requested: required,
        });
    }
    Ok(AllocationPlan {
        draws: vec![BatchDraw {
            batch_id: target.batch_id,
            quantity: required,
            unit_cost: target.cost_price,
        }],
        uncovered: Decimal::ZERO,
        uncovered_unit_cost: Decimal::ZERO,
    })
}

/// Spread a hold over unreserved quantity in FEFO order
pub fn plan_reserve(
    candidates: &[BatchCandidate],
    requested: Decimal,
) -> Result<Vec<(Uuid, Decimal)>, Shortfall> {
    let available: Decimal = candidates.iter().map(BatchCandidate::unreserved).sum();
    if available < requested {
        return Err(Shortfall {
            available,
            requested,
        });
    }

    let mut ordered: Vec<&BatchCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| fefo_order(a, b));

    let mut remaining = requested;
    let mut holds = Vec::new();
    for candidate in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = candidate.unreserved().min(remaining);
        if take > Decimal::ZERO {
            holds.push((candidate.batch_id, take));
            remaining -= take;
        }
    }
    Ok(holds)
}

/// Drain holds latest-expiry first; over-release is silently floored at zero
pub fn plan_release(candidates: &[BatchCandidate], requested: Decimal) -> Vec<(Uuid, Decimal)> {
    let mut ordered: Vec<&BatchCandidate> = candidates
        .iter()
        .filter(|c| c.reserved_quantity > Decimal::ZERO)
        .collect();
    ordered.sort_by(|a, b| fefo_order(b, a));

    let mut remaining = requested;
    let mut releases = Vec::new();
    for candidate in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = candidate.reserved_quantity.min(remaining);
        releases.push((candidate.batch_id, take));
        remaining -= take;
    }
    releases
}
