//! Advisory holds on batch quantity
//!
//! A hold raises `reserved_quantity` without moving stock. Stock-outs do not
//! consult holds; they only clamp a hold to what is left in the batch.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::validation::validate_positive_decimal;
use shared::{plan_release, plan_reserve};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::db::UnitOfWork;
use crate::error::{AppError, AppResult};
use crate::services::hooks::{HookDispatcher, StockEvent, StockEventKind};
use crate::store::{batches, products};

#[derive(Clone)]
pub struct ReservationService {
    db: PgPool,
    hooks: HookDispatcher,
    lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReservationInput {
    pub business_id: Uuid,
    pub product_id: Uuid,
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    /// Hold against this batch only; otherwise spread in expiry order
    pub batch_id: Option<Uuid>,
}

/// Hold change applied to one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchHold {
    pub batch_id: Uuid,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationOutcome {
    pub ok: bool,
    pub holds: Vec<BatchHold>,
}

impl ReservationService {
    pub fn new(db: PgPool, hooks: HookDispatcher, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            hooks,
            lock_timeout_ms,
        }
    }

    pub async fn reserve(&self, input: ReservationInput) -> AppResult<ReservationOutcome> {
        input.validate()?;
        let mut uow = UnitOfWork::begin(&self.db, self.hooks.clone(), self.lock_timeout_ms).await?;
        let outcome = self.reserve_in(&mut uow, &input).await?;
        uow.commit().await?;

        tracing::info!(
            business_id = %input.business_id,
            product_id = %input.product_id,
            quantity = %input.quantity,
            batches = outcome.holds.len(),
            "stock reserved"
        );
        Ok(outcome)
    }

    pub async fn release(&self, input: ReservationInput) -> AppResult<ReservationOutcome> {
        input.validate()?;
        let mut uow = UnitOfWork::begin(&self.db, self.hooks.clone(), self.lock_timeout_ms).await?;
        let outcome = self.release_in(&mut uow, &input).await?;
        uow.commit().await?;

        tracing::info!(
            business_id = %input.business_id,
            product_id = %input.product_id,
            quantity = %input.quantity,
            batches = outcome.holds.len(),
            "reservation released"
        );
        Ok(outcome)
    }

    pub async fn reserve_in(
        &self,
        uow: &mut UnitOfWork,
        input: &ReservationInput,
    ) -> AppResult<ReservationOutcome> {
        input.validate()?;
        let conn = uow.conn();
        let product = products::lock_product(conn, input.business_id, input.product_id).await?;

        let plan = match input.batch_id {
            Some(batch_id) => {
                let batch = batches::lock_batch(conn, input.business_id, product.id, batch_id).await?;
                let candidate = batch.candidate();
                if candidate.unreserved() < input.quantity {
                    return Err(AppError::InsufficientStock {
                        available: candidate.unreserved(),
                        requested: input.quantity,
                    });
                }
                vec![(batch, input.quantity)]
            }
            None => {
                let locked = batches::lock_fefo_batches(conn, input.business_id, product.id, None).await?;
                let candidates: Vec<_> = locked.iter().map(|b| b.candidate()).collect();
                let takes = plan_reserve(&candidates, input.quantity).map_err(|s| {
                    AppError::InsufficientStock {
                        available: s.available,
                        requested: s.requested,
                    }
                })?;
                pair_with_batches(locked, takes)
            }
        };

        let mut holds = Vec::with_capacity(plan.len());
        for (batch, take) in plan {
            let reserved_quantity = batch.reserved_quantity + take;
            batches::set_reserved(conn, batch.id, reserved_quantity).await?;
            holds.push(BatchHold {
                batch_id: batch.id,
                quantity: take,
                reserved_quantity,
            });
        }

        uow.defer(
            StockEvent::new(StockEventKind::Reserved, input.business_id, product.id)
                .change(Decimal::ZERO, product.stock),
        );
        Ok(ReservationOutcome { ok: true, holds })
    }

    /// Release is floored at zero, so releasing more than is held succeeds
    pub async fn release_in(
        &self,
        uow: &mut UnitOfWork,
        input: &ReservationInput,
    ) -> AppResult<ReservationOutcome> {
        input.validate()?;
        let conn = uow.conn();
        let product = products::lock_product(conn, input.business_id, input.product_id).await?;

        let plan = match input.batch_id {
            Some(batch_id) => {
                let batch = batches::lock_batch(conn, input.business_id, product.id, batch_id).await?;
                let take = batch.reserved_quantity.min(input.quantity);
                vec![(batch, take)]
            }
            None => {
                let locked = batches::lock_held_batches(conn, input.business_id, product.id).await?;
                let candidates: Vec<_> = locked.iter().map(|b| b.candidate()).collect();
                let takes = plan_release(&candidates, input.quantity);
                pair_with_batches(locked, takes)
            }
        };

        let mut holds = Vec::with_capacity(plan.len());
        for (batch, take) in plan {
            let reserved_quantity = (batch.reserved_quantity - take).max(Decimal::ZERO);
            batches::set_reserved(conn, batch.id, reserved_quantity).await?;
            holds.push(BatchHold {
                batch_id: batch.id,
                quantity: take,
                reserved_quantity,
            });
        }

        uow.defer(
            StockEvent::new(StockEventKind::Released, input.business_id, product.id)
                .change(Decimal::ZERO, product.stock),
        );
        Ok(ReservationOutcome { ok: true, holds })
    }
}

fn pair_with_batches(
    mut locked: Vec<batches::Batch>,
    takes: Vec<(Uuid, Decimal)>,
) -> Vec<(batches::Batch, Decimal)> {
    takes
        .into_iter()
        .filter_map(|(id, take)| {
            let index = locked.iter().position(|b| b.id == id)?;
            Some((locked.swap_remove(index), take))
        })
        .collect()
}
