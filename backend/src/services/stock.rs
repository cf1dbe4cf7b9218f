//! Stock mutation primitives: add, remove, transfer, adjust
//!
//! Each primitive runs as one unit of work. The plain methods own their
//! transaction; the `*_in` variants write into a caller's [`UnitOfWork`] so
//! several primitives can commit or roll back together.
//!
//! Row locks are taken product first, then locations, then batches and
//! serials. Every mutation of a product holds its product row lock, so
//! mutations of the same product are serialized.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::validation::{
    validate_non_negative_decimal, validate_non_zero_decimal, validate_positive_decimal,
    validate_serial_numbers,
};
use shared::{
    adjustment_lines, extended_value, issue_lines, receipt_lines, serial_count_matches,
    weighted_average_cost, BatchDraw, MovementType, Reference, ReferenceType, SerialStatus,
    StockState, COST_SCALE,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::db::{SchemaCapabilities, UnitOfWork};
use crate::error::{AppError, AppResult};
use crate::services::accounting::GlPoster;
use crate::services::allocator::{AllocationTarget, BatchAllocator};
use crate::services::hooks::{HookDispatcher, StockEvent, StockEventKind};
use crate::store::batches::{self, NewBatch};
use crate::store::{
    journal, locations, products, serials, warehouses, Batch, LedgerEntry, Movement,
    NewLedgerEntry, NewMovement, NewProduct, Product, StockLocation, Warehouse,
};

/// Stock service owning the mutation primitives
#[derive(Clone)]
pub struct StockService {
    db: PgPool,
    caps: SchemaCapabilities,
    hooks: HookDispatcher,
    lock_timeout_ms: u64,
}

/// Input for a stock-in
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddStockInput {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    #[serde(default)]
    pub state: StockState,
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    #[validate(custom = "validate_non_negative_decimal")]
    pub unit_cost: Decimal,
    /// Entry unit; quantity and cost are converted to the base unit
    pub unit: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub batch_number: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_serial_numbers")]
    pub serials: Vec<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub reference: Reference,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddStockOutcome {
    pub new_stock: Decimal,
    pub new_cost_price: Decimal,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub movement_id: Uuid,
    pub posting_id: Option<Uuid>,
}

/// Input for a stock-out
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RemoveStockInput {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    #[serde(default)]
    pub state: StockState,
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    /// Draw only from this batch
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    #[validate(custom = "validate_serial_numbers")]
    pub serials: Vec<String>,
    pub reference: Reference,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveStockOutcome {
    pub new_stock: Decimal,
    pub warehouse_id: Uuid,
    pub movement_id: Uuid,
    pub cost_of_goods_sold: Decimal,
    pub draws: Vec<BatchDraw>,
    pub posting_id: Option<Uuid>,
}

/// Input for moving stock between two warehouses
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferStockInput {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    #[serde(default)]
    pub state: StockState,
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    /// Move this whole batch
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    #[validate(custom = "validate_serial_numbers")]
    pub serials: Vec<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub transfer_id: Uuid,
    pub out_movement_id: Uuid,
    pub in_movement_id: Uuid,
}

/// Input for a manual correction
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AdjustStockInput {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    #[serde(default)]
    pub state: StockState,
    /// Signed change in base units
    #[validate(custom = "validate_non_zero_decimal")]
    pub quantity_change: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_serial_numbers")]
    pub serials: Vec<String>,
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustStockOutcome {
    pub new_stock: Decimal,
    pub warehouse_id: Uuid,
    pub adjustment_id: Uuid,
    pub movement_id: Uuid,
    pub posting_id: Option<Uuid>,
}

/// Product with its locations and batches
#[derive(Debug, Clone, Serialize)]
pub struct StockSnapshot {
    pub product: Product,
    pub locations: Vec<StockLocation>,
    pub batches: Vec<Batch>,
}

impl StockService {
    pub fn new(
        db: PgPool,
        caps: SchemaCapabilities,
        hooks: HookDispatcher,
        lock_timeout_ms: u64,
    ) -> Self {
        Self {
            db,
            caps,
            hooks,
            lock_timeout_ms,
        }
    }

    async fn begin(&self) -> AppResult<UnitOfWork> {
        UnitOfWork::begin(&self.db, self.hooks.clone(), self.lock_timeout_ms).await
    }

    // ========================================================================
    // Add
    // ========================================================================

    pub async fn add(&self, input: AddStockInput) -> AppResult<AddStockOutcome> {
        input.validate()?;
        let mut uow = self.begin().await?;
        let outcome = self.apply_add(&mut uow, &input).await?;
        uow.commit().await?;

        tracing::info!(
            business_id = %input.business_id,
            product_id = %input.product_id,
            warehouse_id = %outcome.warehouse_id,
            quantity = %input.quantity,
            new_stock = %outcome.new_stock,
            reference = %input.reference.kind,
            "stock added"
        );
        Ok(outcome)
    }

    pub async fn add_in(&self, uow: &mut UnitOfWork, input: &AddStockInput) -> AppResult<AddStockOutcome> {
        input.validate()?;
        self.apply_add(uow, input).await
    }

    async fn apply_add(&self, uow: &mut UnitOfWork, input: &AddStockInput) -> AppResult<AddStockOutcome> {
        if let (Some(mfg), Some(expiry)) = (input.manufacturing_date, input.expiry_date) {
            if expiry < mfg {
                return Err(AppError::validation(
                    "expiry_date",
                    "Expiry date is before the manufacturing date",
                ));
            }
        }

        let business_id = input.business_id;
        let conn = uow.conn();
        let product = products::lock_product(conn, business_id, input.product_id).await?;
        let base = product.conversions().to_base(
            &product.base_unit,
            input.unit.as_deref(),
            input.quantity,
            input.unit_cost,
        )?;
        if !input.serials.is_empty() && !serial_count_matches(base.quantity, input.serials.len()) {
            return Err(AppError::validation(
                "serials",
                format!(
                    "{} serials given for a quantity of {}",
                    input.serials.len(),
                    base.quantity
                ),
            ));
        }

        let warehouse_id = warehouses::resolve_warehouse(conn, business_id, input.warehouse_id).await?;
        let warehouse_balance = locations::increment_location(
            conn,
            self.caps,
            business_id,
            warehouse_id,
            product.id,
            input.state,
            base.quantity,
        )
        .await?;

        let batch_id = match input.batch_number.as_deref() {
            Some(number) => Some(
                receive_batch(conn, &product, warehouse_id, number, base.quantity, base.unit_cost, input)
                    .await?,
            ),
            None => None,
        };

        if !input.serials.is_empty() {
            serials::register_serials(conn, business_id, product.id, warehouse_id, batch_id, &input.serials)
                .await?;
        }

        let new_stock = product.stock + base.quantity;
        let new_cost_price =
            weighted_average_cost(product.stock, product.cost_price, base.quantity, base.unit_cost);
        products::update_stock(conn, product.id, new_stock, new_cost_price).await?;

        let movement_id = journal::insert_movement(
            conn,
            &NewMovement {
                business_id,
                product_id: product.id,
                warehouse_id,
                batch_id,
                movement_type: MovementType::In,
                quantity_change: base.quantity,
                unit_cost: base.unit_cost,
                reference: input.reference,
                notes: input.notes.as_deref(),
            },
        )
        .await?;

        let value = extended_value(base.quantity, base.unit_cost);
        journal::append_ledger(
            conn,
            &NewLedgerEntry {
                business_id,
                product_id: product.id,
                warehouse_id,
                batch_id,
                entry_type: MovementType::In,
                quantity_change: base.quantity,
                unit_cost: base.unit_cost,
                value_change: value,
                balance_quantity: new_stock,
                balance_value: extended_value(new_stock, new_cost_price),
                warehouse_balance,
                reference: input.reference,
            },
        )
        .await?;

        let posting_id = match receipt_lines(input.reference.kind, value) {
            Some(lines) => {
                let description = format!("Stock in ({}) {}", input.reference.kind, product.sku);
                GlPoster::post(conn, business_id, input.reference, &description, &lines)
                    .await?
                    .map(|p| p.posting_id)
            }
            None => None,
        };

        uow.defer(
            StockEvent::new(StockEventKind::Added, business_id, product.id)
                .at(warehouse_id)
                .change(base.quantity, new_stock)
                .reference(input.reference),
        );

        Ok(AddStockOutcome {
            new_stock,
            new_cost_price,
            warehouse_id,
            batch_id,
            movement_id,
            posting_id,
        })
    }

    // ========================================================================
    // Remove
    // ========================================================================

    pub async fn remove(&self, input: RemoveStockInput) -> AppResult<RemoveStockOutcome> {
        input.validate()?;
        let mut uow = self.begin().await?;
        let outcome = self.apply_remove(&mut uow, &input).await?;
        uow.commit().await?;

        tracing::info!(
            business_id = %input.business_id,
            product_id = %input.product_id,
            warehouse_id = %outcome.warehouse_id,
            quantity = %input.quantity,
            new_stock = %outcome.new_stock,
            cost_of_goods_sold = %outcome.cost_of_goods_sold,
            reference = %input.reference.kind,
            "stock removed"
        );
        Ok(outcome)
    }

    pub async fn remove_in(
        &self,
        uow: &mut UnitOfWork,
        input: &RemoveStockInput,
    ) -> AppResult<RemoveStockOutcome> {
        input.validate()?;
        self.apply_remove(uow, input).await
    }

    async fn apply_remove(
        &self,
        uow: &mut UnitOfWork,
        input: &RemoveStockInput,
    ) -> AppResult<RemoveStockOutcome> {
        let business_id = input.business_id;
        let quantity = input.quantity;
        let conn = uow.conn();
        let product = products::lock_product(conn, business_id, input.product_id).await?;

        // A targeted batch outside the requested warehouse is a caller error
        let target_batch = match input.batch_id {
            Some(batch_id) => {
                let batch = batches::lock_batch(conn, business_id, product.id, batch_id).await?;
                if input.warehouse_id.is_some_and(|w| w != batch.warehouse_id) {
                    return Err(AppError::validation(
                        "batch_id",
                        "Batch is held in another warehouse",
                    ));
                }
                Some(batch)
            }
            None => None,
        };

        // Unscoped removals check global stock and draw the location of the
        // targeted batch, or the primary warehouse
        let warehouse_id = match (input.warehouse_id, &target_batch) {
            (Some(_), _) => {
                warehouses::resolve_warehouse(conn, business_id, input.warehouse_id).await?
            }
            (None, Some(batch)) => batch.warehouse_id,
            (None, None) => warehouses::resolve_warehouse(conn, business_id, None).await?,
        };
        let location =
            locations::lock_location(conn, self.caps, warehouse_id, product.id, input.state).await?;
        let available = if input.warehouse_id.is_some() {
            location.as_ref().map_or(Decimal::ZERO, |l| l.quantity)
        } else {
            product.stock
        };
        if available < quantity {
            return Err(AppError::InsufficientStock {
                available,
                requested: quantity,
            });
        }

        let target = if !input.serials.is_empty() {
            AllocationTarget::Serials {
                numbers: &input.serials,
                batch_id: input.batch_id,
                warehouse_id: Some(warehouse_id),
            }
        } else if let Some(batch_id) = input.batch_id {
            AllocationTarget::Batch(batch_id)
        } else {
            // Batches are drawn where the location is decremented
            AllocationTarget::Fefo {
                warehouse_id: Some(warehouse_id),
            }
        };
        let allocation = BatchAllocator::new(business_id, product.id, product.cost_price)
            .allocate(conn, target, quantity)
            .await?;

        let warehouse_balance =
            locations::decrement_location(conn, self.caps, warehouse_id, product.id, input.state, quantity)
                .await?;

        if !allocation.serial_ids.is_empty() {
            serials::set_serial_status(conn, &allocation.serial_ids, SerialStatus::Sold).await?;
        }

        let new_stock = product.stock - quantity;
        products::update_stock(conn, product.id, new_stock, product.cost_price).await?;

        let cost_of_goods_sold = allocation.cost_of_goods_sold;
        let unit_cost = (cost_of_goods_sold / quantity).round_dp(COST_SCALE);
        let batch_id = match allocation.draws.as_slice() {
            [only] => Some(only.batch_id),
            _ => input.batch_id,
        };

        let movement_id = journal::insert_movement(
            conn,
            &NewMovement {
                business_id,
                product_id: product.id,
                warehouse_id,
                batch_id,
                movement_type: MovementType::Out,
                quantity_change: -quantity,
                unit_cost,
                reference: input.reference,
                notes: input.notes.as_deref(),
            },
        )
        .await?;

        journal::append_ledger(
            conn,
            &NewLedgerEntry {
                business_id,
                product_id: product.id,
                warehouse_id,
                batch_id,
                entry_type: MovementType::Out,
                quantity_change: -quantity,
                unit_cost,
                value_change: -cost_of_goods_sold,
                balance_quantity: new_stock,
                balance_value: extended_value(new_stock, product.cost_price),
                warehouse_balance,
                reference: input.reference,
            },
        )
        .await?;

        let description = format!("Stock out ({}) {}", input.reference.kind, product.sku);
        let posting_id = GlPoster::post(
            conn,
            business_id,
            input.reference,
            &description,
            &issue_lines(input.reference.kind, cost_of_goods_sold),
        )
        .await?
        .map(|p| p.posting_id);

        uow.defer(
            StockEvent::new(StockEventKind::Removed, business_id, product.id)
                .at(warehouse_id)
                .change(-quantity, new_stock)
                .reference(input.reference),
        );

        Ok(RemoveStockOutcome {
            new_stock,
            warehouse_id,
            movement_id,
            cost_of_goods_sold,
            draws: allocation.draws,
            posting_id,
        })
    }

    // ========================================================================
    // Transfer
    // ========================================================================

    pub async fn transfer(&self, input: TransferStockInput) -> AppResult<TransferOutcome> {
        input.validate()?;
        check_distinct_warehouses(&input)?;
        let mut uow = self.begin().await?;
        let outcome = self.apply_transfer(&mut uow, &input).await?;
        uow.commit().await?;

        tracing::info!(
            business_id = %input.business_id,
            product_id = %input.product_id,
            from_warehouse_id = %input.from_warehouse_id,
            to_warehouse_id = %input.to_warehouse_id,
            quantity = %input.quantity,
            transfer_id = %outcome.transfer_id,
            "stock transferred"
        );
        Ok(outcome)
    }

    pub async fn transfer_in(
        &self,
        uow: &mut UnitOfWork,
        input: &TransferStockInput,
    ) -> AppResult<TransferOutcome> {
        input.validate()?;
        check_distinct_warehouses(input)?;
        self.apply_transfer(uow, input).await
    }

    async fn apply_transfer(
        &self,
        uow: &mut UnitOfWork,
        input: &TransferStockInput,
    ) -> AppResult<TransferOutcome> {
        let business_id = input.business_id;
        let quantity = input.quantity;
        let (from, to) = (input.from_warehouse_id, input.to_warehouse_id);
        let conn = uow.conn();
        let product = products::lock_product(conn, business_id, input.product_id).await?;
        warehouses::resolve_warehouse(conn, business_id, Some(from)).await?;
        warehouses::resolve_warehouse(conn, business_id, Some(to)).await?;

        // Lock both locations in warehouse id order
        let (first, second) = if from < to { (from, to) } else { (to, from) };
        let first_row = locations::lock_location(conn, self.caps, first, product.id, input.state).await?;
        let second_row = locations::lock_location(conn, self.caps, second, product.id, input.state).await?;
        let source = if first == from { first_row } else { second_row };
        let available = source.map_or(Decimal::ZERO, |l| l.quantity);
        if available < quantity {
            return Err(AppError::InsufficientStock {
                available,
                requested: quantity,
            });
        }

        if let Some(batch_id) = input.batch_id {
            let batch = batches::lock_batch(conn, business_id, product.id, batch_id).await?;
            if batch.warehouse_id != from {
                return Err(AppError::validation(
                    "batch_id",
                    "Batch is not held in the source warehouse",
                ));
            }
            if batch.quantity != quantity {
                return Err(AppError::validation(
                    "quantity",
                    format!(
                        "Batch transfers move the whole batch ({} on hand)",
                        batch.quantity
                    ),
                ));
            }
            batches::relocate_batch(conn, batch_id, to).await?;
            serials::move_batch_serials(conn, batch_id, to).await?;
        }

        if !input.serials.is_empty() {
            let serial_ids = transferable_serials(conn, input, product.id).await?;
            serials::move_serials(conn, &serial_ids, to).await?;
        }

        let transfer =
            journal::insert_transfer(conn, business_id, product.id, from, to, input.batch_id, quantity)
                .await?;
        let reference = Reference::new(ReferenceType::Transfer, transfer.id);

        let source_balance =
            locations::decrement_location(conn, self.caps, from, product.id, input.state, quantity).await?;
        locations::increment_location(conn, self.caps, business_id, to, product.id, input.state, quantity)
            .await?;

        let mut movement = NewMovement {
            business_id,
            product_id: product.id,
            warehouse_id: from,
            batch_id: input.batch_id,
            movement_type: MovementType::TransferOut,
            quantity_change: -quantity,
            unit_cost: product.cost_price,
            reference,
            notes: input.notes.as_deref(),
        };
        let out_movement_id = journal::insert_movement(conn, &movement).await?;
        movement.warehouse_id = to;
        movement.movement_type = MovementType::TransferIn;
        movement.quantity_change = quantity;
        let in_movement_id = journal::insert_movement(conn, &movement).await?;

        journal::append_ledger(
            conn,
            &NewLedgerEntry {
                business_id,
                product_id: product.id,
                warehouse_id: from,
                batch_id: input.batch_id,
                entry_type: MovementType::TransferOut,
                quantity_change: -quantity,
                unit_cost: product.cost_price,
                value_change: -extended_value(quantity, product.cost_price),
                balance_quantity: product.stock,
                balance_value: product.stock_value(),
                warehouse_balance: source_balance,
                reference,
            },
        )
        .await?;

        uow.defer(
            StockEvent::new(StockEventKind::Transferred, business_id, product.id)
                .at(from)
                .change(Decimal::ZERO, product.stock)
                .reference(reference),
        );

        Ok(TransferOutcome {
            transfer_id: transfer.id,
            out_movement_id,
            in_movement_id,
        })
    }

    // ========================================================================
    // Adjust
    // ========================================================================

    pub async fn adjust(&self, input: AdjustStockInput) -> AppResult<AdjustStockOutcome> {
        input.validate()?;
        let mut uow = self.begin().await?;
        let outcome = self.apply_adjust(&mut uow, &input).await?;
        uow.commit().await?;

        tracing::info!(
            business_id = %input.business_id,
            product_id = %input.product_id,
            warehouse_id = %outcome.warehouse_id,
            quantity_change = %input.quantity_change,
            new_stock = %outcome.new_stock,
            reason = %input.reason,
            "stock adjusted"
        );
        Ok(outcome)
    }

    pub async fn adjust_in(
        &self,
        uow: &mut UnitOfWork,
        input: &AdjustStockInput,
    ) -> AppResult<AdjustStockOutcome> {
        input.validate()?;
        self.apply_adjust(uow, input).await
    }

    async fn apply_adjust(
        &self,
        uow: &mut UnitOfWork,
        input: &AdjustStockInput,
    ) -> AppResult<AdjustStockOutcome> {
        let business_id = input.business_id;
        let change = input.quantity_change;
        let increase = change > Decimal::ZERO;
        if !input.serials.is_empty() && !serial_count_matches(change.abs(), input.serials.len()) {
            return Err(AppError::validation(
                "serials",
                format!("{} serials given for a change of {change}", input.serials.len()),
            ));
        }

        let conn = uow.conn();
        let product = products::lock_product(conn, business_id, input.product_id).await?;
        let new_stock = product.stock + change;
        if new_stock < Decimal::ZERO {
            return Err(AppError::InsufficientStock {
                available: product.stock,
                requested: change.abs(),
            });
        }

        let warehouse_id = warehouses::resolve_warehouse(conn, business_id, input.warehouse_id).await?;
        let warehouse_balance = if increase {
            locations::increment_location(
                conn,
                self.caps,
                business_id,
                warehouse_id,
                product.id,
                input.state,
                change,
            )
            .await?
        } else {
            locations::decrement_location(conn, self.caps, warehouse_id, product.id, input.state, -change)
                .await?
        };

        // A write-off takes its units out of the warehouse's batches too
        let mut batch_id = None;
        if increase {
            if !input.serials.is_empty() {
                serials::register_serials(conn, business_id, product.id, warehouse_id, None, &input.serials)
                    .await?;
            }
        } else {
            let target = if input.serials.is_empty() {
                AllocationTarget::Fefo {
                    warehouse_id: Some(warehouse_id),
                }
            } else {
                AllocationTarget::Serials {
                    numbers: &input.serials,
                    batch_id: None,
                    warehouse_id: Some(warehouse_id),
                }
            };
            let allocation = BatchAllocator::new(business_id, product.id, product.cost_price)
                .allocate(conn, target, -change)
                .await?;
            if !allocation.serial_ids.is_empty() {
                serials::set_serial_status(conn, &allocation.serial_ids, SerialStatus::Sold).await?;
            }
            if let [only] = allocation.draws.as_slice() {
                batch_id = Some(only.batch_id);
            }
        }

        products::update_stock(conn, product.id, new_stock, product.cost_price).await?;

        let adjustment_id = Uuid::new_v4();
        let reference = Reference::new(ReferenceType::Adjustment, adjustment_id);
        let movement_type = if increase {
            MovementType::AdjustmentIn
        } else {
            MovementType::AdjustmentOut
        };
        let movement_id = journal::insert_movement(
            conn,
            &NewMovement {
                business_id,
                product_id: product.id,
                warehouse_id,
                batch_id,
                movement_type,
                quantity_change: change,
                unit_cost: product.cost_price,
                reference,
                notes: Some(input.reason.as_str()),
            },
        )
        .await?;

        let value = extended_value(change, product.cost_price);
        journal::append_ledger(
            conn,
            &NewLedgerEntry {
                business_id,
                product_id: product.id,
                warehouse_id,
                batch_id,
                entry_type: movement_type,
                quantity_change: change,
                unit_cost: product.cost_price,
                value_change: if increase { value } else { -value },
                balance_quantity: new_stock,
                balance_value: extended_value(new_stock, product.cost_price),
                warehouse_balance,
                reference,
            },
        )
        .await?;

        let description = format!("Stock adjustment {}: {}", product.sku, input.reason);
        let posting_id = GlPoster::post(
            conn,
            business_id,
            reference,
            &description,
            &adjustment_lines(increase, value),
        )
        .await?
        .map(|p| p.posting_id);

        uow.defer(
            StockEvent::new(StockEventKind::Adjusted, business_id, product.id)
                .at(warehouse_id)
                .change(change, new_stock)
                .reference(reference),
        );

        Ok(AdjustStockOutcome {
            new_stock,
            warehouse_id,
            adjustment_id,
            movement_id,
            posting_id,
        })
    }

    // ========================================================================
    // Catalog and read models
    // ========================================================================

    pub async fn create_product(&self, business_id: Uuid, input: NewProduct) -> AppResult<Product> {
        input.validate()?;
        let mut conn = self.db.acquire().await?;
        products::create_product(&mut conn, business_id, &input).await
    }

    pub async fn create_warehouse(
        &self,
        business_id: Uuid,
        code: &str,
        name: &str,
        is_primary: bool,
    ) -> AppResult<Warehouse> {
        if code.trim().is_empty() {
            return Err(AppError::validation("code", "Warehouse code is required"));
        }
        let mut conn = self.db.acquire().await?;
        warehouses::create_warehouse(&mut conn, business_id, code.trim(), name, is_primary).await
    }

    pub async fn snapshot(&self, business_id: Uuid, product_id: Uuid) -> AppResult<StockSnapshot> {
        let mut conn = self.db.acquire().await?;
        let product = products::get_product(&mut conn, business_id, product_id).await?;
        let locations = locations::list_locations(&mut conn, self.caps, business_id, product_id).await?;
        let batches = batches::list_batches(&mut conn, business_id, product_id).await?;
        Ok(StockSnapshot {
            product,
            locations,
            batches,
        })
    }

    pub async fn movements_by_reference(
        &self,
        business_id: Uuid,
        reference: Reference,
    ) -> AppResult<Vec<Movement>> {
        let mut conn = self.db.acquire().await?;
        journal::movements_by_reference(&mut conn, business_id, reference).await
    }

    pub async fn movements(&self, business_id: Uuid, product_id: Uuid) -> AppResult<Vec<Movement>> {
        let mut conn = self.db.acquire().await?;
        journal::movements_for_product(&mut conn, business_id, product_id).await
    }

    pub async fn ledger(&self, business_id: Uuid, product_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let mut conn = self.db.acquire().await?;
        journal::ledger_for_product(&mut conn, business_id, product_id).await
    }
}

fn check_distinct_warehouses(input: &TransferStockInput) -> AppResult<()> {
    if input.from_warehouse_id == input.to_warehouse_id {
        return Err(AppError::validation(
            "to_warehouse_id",
            "Source and destination warehouse must differ",
        ));
    }
    Ok(())
}

/// Upsert the named batch; an existing batch is re-costed at its weighted average
async fn receive_batch(
    conn: &mut PgConnection,
    product: &Product,
    warehouse_id: Uuid,
    batch_number: &str,
    quantity: Decimal,
    unit_cost: Decimal,
    input: &AddStockInput,
) -> AppResult<Uuid> {
    match batches::lock_batch_by_number(conn, product.business_id, product.id, batch_number).await? {
        Some(batch) if batch.warehouse_id != warehouse_id => Err(AppError::validation(
            "batch_number",
            format!("Batch {batch_number} is held in another warehouse"),
        )),
        Some(batch) => {
            let cost = weighted_average_cost(batch.quantity, batch.cost_price, quantity, unit_cost);
            batches::receive_into_batch(
                conn,
                batch.id,
                batch.quantity + quantity,
                cost,
                input.manufacturing_date,
                input.expiry_date,
            )
            .await?;
            Ok(batch.id)
        }
        None => {
            let batch = batches::insert_batch(
                conn,
                &NewBatch {
                    business_id: product.business_id,
                    product_id: product.id,
                    warehouse_id,
                    batch_number,
                    quantity,
                    cost_price: unit_cost,
                    manufacturing_date: input.manufacturing_date,
                    expiry_date: input.expiry_date,
                },
            )
            .await?;
            Ok(batch.id)
        }
    }
}

/// Lock and check the serials a transfer moves; all must sit at the source
async fn transferable_serials(
    conn: &mut PgConnection,
    input: &TransferStockInput,
    product_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    if !serial_count_matches(input.quantity, input.serials.len()) {
        return Err(AppError::validation(
            "serials",
            format!(
                "{} serials given for a quantity of {}",
                input.serials.len(),
                input.quantity
            ),
        ));
    }

    let units = serials::lock_existing_serials(conn, input.business_id, &input.serials).await?;
    for unit in &units {
        let at_source = unit.warehouse_id == Some(input.from_warehouse_id);
        let in_batch = input.batch_id.is_none() || unit.batch_id == input.batch_id;
        if unit.product_id != product_id || !unit.is_in_stock() || !at_source || !in_batch {
            return Err(AppError::validation(
                "serials",
                format!("Serial {} is not in stock at the source warehouse", unit.serial_number),
            ));
        }
    }
    Ok(units.iter().map(|u| u.id).collect())
}
