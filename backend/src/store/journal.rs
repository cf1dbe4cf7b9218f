//! Movements, the append-only inventory ledger, and transfer records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{MovementType, Reference};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::AppResult;

/// Immutable record of one stock event
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Movement {
    pub id: Uuid,
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub movement_type: String,
    pub quantity_change: Decimal,
    pub unit_cost: Decimal,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMovement<'a> {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub movement_type: MovementType,
    pub quantity_change: Decimal,
    pub unit_cost: Decimal,
    pub reference: Reference,
    pub notes: Option<&'a str>,
}

/// Ledger row with the running balance after the event
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub entry_type: String,
    pub quantity_change: Decimal,
    pub unit_cost: Decimal,
    pub value_change: Decimal,
    /// Product-wide stock after the event
    pub balance_quantity: Decimal,
    pub balance_value: Decimal,
    /// Location quantity in `warehouse_id` after the event
    pub warehouse_balance: Decimal,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub entry_type: MovementType,
    pub quantity_change: Decimal,
    pub unit_cost: Decimal,
    pub value_change: Decimal,
    pub balance_quantity: Decimal,
    pub balance_value: Decimal,
    pub warehouse_balance: Decimal,
    pub reference: Reference,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Transfer {
    pub id: Uuid,
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub quantity: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_movement(conn: &mut PgConnection, movement: &NewMovement<'_>) -> AppResult<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO stock_movements (
            business_id, product_id, warehouse_id, batch_id, movement_type,
            quantity_change, unit_cost, reference_type, reference_id, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(movement.business_id)
    .bind(movement.product_id)
    .bind(movement.warehouse_id)
    .bind(movement.batch_id)
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity_change)
    .bind(movement.unit_cost)
    .bind(movement.reference.kind.as_str())
    .bind(movement.reference.id)
    .bind(movement.notes)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn append_ledger(conn: &mut PgConnection, entry: &NewLedgerEntry) -> AppResult<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO inventory_ledger (
            business_id, product_id, warehouse_id, batch_id, entry_type, quantity_change,
            unit_cost, value_change, balance_quantity, balance_value, warehouse_balance,
            reference_type, reference_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING id
        "#,
    )
    .bind(entry.business_id)
    .bind(entry.product_id)
    .bind(entry.warehouse_id)
    .bind(entry.batch_id)
    .bind(entry.entry_type.as_str())
    .bind(entry.quantity_change)
    .bind(entry.unit_cost)
    .bind(entry.value_change)
    .bind(entry.balance_quantity)
    .bind(entry.balance_value)
    .bind(entry.warehouse_balance)
    .bind(entry.reference.kind.as_str())
    .bind(entry.reference.id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn insert_transfer(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
    from_warehouse_id: Uuid,
    to_warehouse_id: Uuid,
    batch_id: Option<Uuid>,
    quantity: Decimal,
) -> AppResult<Transfer> {
    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        INSERT INTO stock_transfers (business_id, product_id, from_warehouse_id, to_warehouse_id, batch_id, quantity)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, business_id, product_id, from_warehouse_id, to_warehouse_id, batch_id,
                  quantity, status, created_at
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .bind(from_warehouse_id)
    .bind(to_warehouse_id)
    .bind(batch_id)
    .bind(quantity)
    .fetch_one(&mut *conn)
    .await?;

    Ok(transfer)
}

pub async fn movements_by_reference(
    conn: &mut PgConnection,
    business_id: Uuid,
    reference: Reference,
) -> AppResult<Vec<Movement>> {
    let movements = sqlx::query_as::<_, Movement>(
        r#"
        SELECT id, business_id, product_id, warehouse_id, batch_id, movement_type,
               quantity_change, unit_cost, reference_type, reference_id, notes, created_at
        FROM stock_movements
        WHERE business_id = $1 AND reference_type = $2 AND reference_id = $3
        ORDER BY created_at, id
        "#,
    )
    .bind(business_id)
    .bind(reference.kind.as_str())
    .bind(reference.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(movements)
}

pub async fn movements_for_product(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Vec<Movement>> {
    let movements = sqlx::query_as::<_, Movement>(
        r#"
        SELECT id, business_id, product_id, warehouse_id, batch_id, movement_type,
               quantity_change, unit_cost, reference_type, reference_id, notes, created_at
        FROM stock_movements
        WHERE business_id = $1 AND product_id = $2
        ORDER BY created_at, id
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(movements)
}

pub async fn ledger_for_product(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, business_id, product_id, warehouse_id, batch_id, entry_type, quantity_change,
               unit_cost, value_change, balance_quantity, balance_value, warehouse_balance,
               reference_type, reference_id, created_at
        FROM inventory_ledger
        WHERE business_id = $1 AND product_id = $2
        ORDER BY created_at, id
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(entries)
}
