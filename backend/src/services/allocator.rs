//! Batch allocation for outbound stock
//!
//! Plans come from the pure functions in `shared`; this module locks the
//! batches, applies the plan, and reports the cost of goods sold.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{plan_exclusive, plan_fefo, AllocationPlan, BatchDraw};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{batches, serials};

/// Where an outbound quantity may be drawn from
#[derive(Debug, Clone, Copy)]
pub enum AllocationTarget<'a> {
    /// Any active batch, soonest expiry first, optionally within one warehouse
    Fefo { warehouse_id: Option<Uuid> },
    /// One named batch, exclusively
    Batch(Uuid),
    /// Exactly these serialized units, optionally required to sit in one batch
    Serials {
        numbers: &'a [String],
        batch_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    },
}

/// Applied allocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Allocation {
    pub draws: Vec<BatchDraw>,
    /// Quantity not drawn from any batch, costed at the product average
    pub uncovered: Decimal,
    pub cost_of_goods_sold: Decimal,
    /// Serial rows consumed by a serial target
    pub serial_ids: Vec<Uuid>,
}

impl Allocation {
    fn from_plan(plan: AllocationPlan, serial_ids: Vec<Uuid>) -> Self {
        Self {
            cost_of_goods_sold: plan.cost_of_goods_sold(),
            uncovered: plan.uncovered,
            draws: plan.draws,
            serial_ids,
        }
    }
}

/// Allocates one product's outbound quantity; callers hold the product lock
pub struct BatchAllocator {
    business_id: Uuid,
    product_id: Uuid,
    /// Weighted-average cost used for quantity no batch covers
    fallback_cost: Decimal,
}

impl BatchAllocator {
    pub fn new(business_id: Uuid, product_id: Uuid, fallback_cost: Decimal) -> Self {
        Self {
            business_id,
            product_id,
            fallback_cost,
        }
    }

    pub async fn allocate(
        &self,
        conn: &mut PgConnection,
        target: AllocationTarget<'_>,
        quantity: Decimal,
    ) -> AppResult<Allocation> {
        let (plan, serial_ids) = match target {
            AllocationTarget::Fefo { warehouse_id } => {
                let candidates: Vec<_> =
                    batches::lock_fefo_batches(conn, self.business_id, self.product_id, warehouse_id)
                        .await?
                        .iter()
                        .map(|b| b.candidate())
                        .collect();
                (plan_fefo(&candidates, quantity, self.fallback_cost), Vec::new())
            }
            AllocationTarget::Batch(batch_id) => {
                let batch = batches::lock_batch(conn, self.business_id, self.product_id, batch_id).await?;
                (exclusive(&batch.candidate(), quantity)?, Vec::new())
            }
            AllocationTarget::Serials {
                numbers,
                batch_id,
                warehouse_id,
            } => self.plan_serials(conn, numbers, batch_id, warehouse_id, quantity).await?,
        };

        for draw in &plan.draws {
            tracing::debug!(
                product_id = %self.product_id,
                batch_id = %draw.batch_id,
                quantity = %draw.quantity,
                unit_cost = %draw.unit_cost,
                "batch draw"
            );
            batches::consume_batch(conn, draw.batch_id, draw.quantity)
                .await?
                .ok_or(AppError::InsufficientStock {
                    available: Decimal::ZERO,
                    requested: draw.quantity,
                })?;
        }
        if plan.uncovered > Decimal::ZERO {
            tracing::debug!(
                product_id = %self.product_id,
                uncovered = %plan.uncovered,
                unit_cost = %plan.uncovered_unit_cost,
                "quantity not covered by batches, costed at average"
            );
        }

        Ok(Allocation::from_plan(plan, serial_ids))
    }

    async fn plan_serials(
        &self,
        conn: &mut PgConnection,
        numbers: &[String],
        batch_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
        quantity: Decimal,
    ) -> AppResult<(AllocationPlan, Vec<Uuid>)> {
        if !shared::serial_count_matches(quantity, numbers.len()) {
            return Err(AppError::validation(
                "serials",
                format!("{} serials given for a quantity of {quantity}", numbers.len()),
            ));
        }

        let units = serials::lock_existing_serials(conn, self.business_id, numbers).await?;
        for unit in &units {
            if unit.product_id != self.product_id {
                return Err(AppError::validation(
                    "serials",
                    format!("Serial {} belongs to another product", unit.serial_number),
                ));
            }
            if !unit.is_in_stock() {
                return Err(AppError::validation(
                    "serials",
                    format!("Serial {} is not in stock", unit.serial_number),
                ));
            }
            if batch_id.is_some() && unit.batch_id != batch_id {
                return Err(AppError::validation(
                    "serials",
                    format!("Serial {} is not in the requested batch", unit.serial_number),
                ));
            }
            if warehouse_id.is_some() && unit.warehouse_id != warehouse_id {
                return Err(AppError::validation(
                    "serials",
                    format!("Serial {} is not in the requested warehouse", unit.serial_number),
                ));
            }
        }

        // Units per batch, in batch id order so locks are taken consistently
        let mut per_batch: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        let mut unbatched = Decimal::ZERO;
        for unit in &units {
            match unit.batch_id {
                Some(id) => *per_batch.entry(id).or_default() += Decimal::ONE,
                None => unbatched += Decimal::ONE,
            }
        }

        let mut draws = Vec::with_capacity(per_batch.len());
        for (id, count) in per_batch {
            let batch = batches::lock_batch(conn, self.business_id, self.product_id, id).await?;
            draws.extend(exclusive(&batch.candidate(), count)?.draws);
        }

        let plan = AllocationPlan {
            draws,
            uncovered: unbatched,
            uncovered_unit_cost: self.fallback_cost,
        };
        Ok((plan, units.iter().map(|u| u.id).collect()))
    }
}

fn exclusive(candidate: &shared::BatchCandidate, quantity: Decimal) -> AppResult<AllocationPlan> {
    plan_exclusive(candidate, quantity).map_err(|s| AppError::InsufficientStock {
        available: s.available,
        requested: s.requested,
    })
}
