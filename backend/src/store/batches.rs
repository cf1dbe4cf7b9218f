//! Batch (lot) rows: quantity, holds, cost and expiry

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::BatchCandidate;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Batch {
    pub id: Uuid,
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_number: String,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub cost_price: Decimal,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn candidate(&self) -> BatchCandidate {
        BatchCandidate {
            batch_id: self.id,
            quantity: self.quantity,
            reserved_quantity: self.reserved_quantity,
            cost_price: self.cost_price,
            expiry_date: self.expiry_date,
            created_at: self.created_at,
        }
    }
}

/// Values for a batch created by a stock-in
#[derive(Debug, Clone)]
pub struct NewBatch<'a> {
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_number: &'a str,
    pub quantity: Decimal,
    pub cost_price: Decimal,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
}

const BATCH_COLUMNS: &str = "id, business_id, product_id, warehouse_id, batch_number, quantity, \
     reserved_quantity, cost_price, manufacturing_date, expiry_date, is_active, created_at, updated_at";

pub async fn lock_batch_by_number(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
    batch_number: &str,
) -> AppResult<Option<Batch>> {
    let batch = sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches \
         WHERE business_id = $1 AND product_id = $2 AND batch_number = $3 \
         FOR UPDATE"
    ))
    .bind(business_id)
    .bind(product_id)
    .bind(batch_number)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(batch)
}

pub async fn lock_batch(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
    batch_id: Uuid,
) -> AppResult<Batch> {
    sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches \
         WHERE id = $1 AND business_id = $2 AND product_id = $3 AND is_active = true \
         FOR UPDATE"
    ))
    .bind(batch_id)
    .bind(business_id)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Batch".to_string()))
}

/// Active batches with stock, locked in FEFO order
pub async fn lock_fefo_batches(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
    warehouse_id: Option<Uuid>,
) -> AppResult<Vec<Batch>> {
    let batches = sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches \
         WHERE business_id = $1 AND product_id = $2 \
           AND ($3::uuid IS NULL OR warehouse_id = $3) \
           AND is_active = true AND quantity > 0 \
         ORDER BY expiry_date ASC NULLS LAST, created_at ASC \
         FOR UPDATE"
    ))
    .bind(business_id)
    .bind(product_id)
    .bind(warehouse_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(batches)
}

/// Batches currently carrying a hold, locked
pub async fn lock_held_batches(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Vec<Batch>> {
    let batches = sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches \
         WHERE business_id = $1 AND product_id = $2 AND reserved_quantity > 0 \
         ORDER BY expiry_date ASC NULLS LAST, created_at ASC \
         FOR UPDATE"
    ))
    .bind(business_id)
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(batches)
}

pub async fn insert_batch(conn: &mut PgConnection, batch: &NewBatch<'_>) -> AppResult<Batch> {
    let created = sqlx::query_as::<_, Batch>(&format!(
        "INSERT INTO batches (business_id, product_id, warehouse_id, batch_number, quantity, \
                              cost_price, manufacturing_date, expiry_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {BATCH_COLUMNS}"
    ))
    .bind(batch.business_id)
    .bind(batch.product_id)
    .bind(batch.warehouse_id)
    .bind(batch.batch_number)
    .bind(batch.quantity)
    .bind(batch.cost_price)
    .bind(batch.manufacturing_date)
    .bind(batch.expiry_date)
    .fetch_one(&mut *conn)
    .await?;

    Ok(created)
}

/// Record a further receipt into an existing, locked batch
pub async fn receive_into_batch(
    conn: &mut PgConnection,
    batch_id: Uuid,
    quantity: Decimal,
    cost_price: Decimal,
    manufacturing_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE batches
        SET quantity = $1,
            cost_price = $2,
            manufacturing_date = COALESCE($3, manufacturing_date),
            expiry_date = COALESCE($4, expiry_date),
            is_active = true,
            updated_at = NOW()
        WHERE id = $5
        "#,
    )
    .bind(quantity)
    .bind(cost_price)
    .bind(manufacturing_date)
    .bind(expiry_date)
    .bind(batch_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Take `quantity` out of a batch, clamping any hold to what is left.
///
/// Returns the remaining quantity, or `None` if the batch could not cover it.
pub async fn consume_batch(
    conn: &mut PgConnection,
    batch_id: Uuid,
    quantity: Decimal,
) -> AppResult<Option<Decimal>> {
    let remaining = sqlx::query_scalar::<_, Decimal>(
        r#"
        UPDATE batches
        SET quantity = quantity - $2,
            reserved_quantity = LEAST(reserved_quantity, quantity - $2),
            updated_at = NOW()
        WHERE id = $1 AND quantity >= $2
        RETURNING quantity
        "#,
    )
    .bind(batch_id)
    .bind(quantity)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(remaining)
}

pub async fn set_reserved(
    conn: &mut PgConnection,
    batch_id: Uuid,
    reserved_quantity: Decimal,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE batches
        SET reserved_quantity = $1, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(reserved_quantity)
    .bind(batch_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn relocate_batch(
    conn: &mut PgConnection,
    batch_id: Uuid,
    warehouse_id: Uuid,
) -> AppResult<()> {
    sqlx::query("UPDATE batches SET warehouse_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(warehouse_id)
        .bind(batch_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn list_batches(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Vec<Batch>> {
    let batches = sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches \
         WHERE business_id = $1 AND product_id = $2 \
         ORDER BY expiry_date ASC NULLS LAST, created_at ASC"
    ))
    .bind(business_id)
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(batches)
}
