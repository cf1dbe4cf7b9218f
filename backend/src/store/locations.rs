//! Warehouse/state location quantities
//!
//! Databases that predate the `state` column key locations by
//! (warehouse, product) only; the resolved [`SchemaCapabilities`] picks the
//! query shape so no call has to probe the schema.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::StockState;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::db::SchemaCapabilities;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockLocation {
    pub id: Uuid,
    pub business_id: Uuid,
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub state: String,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

fn state_column(caps: SchemaCapabilities) -> &'static str {
    if caps.location_state {
        "state"
    } else {
        "'sellable'::varchar AS state"
    }
}

/// Lock one location row; `None` if it was never created
pub async fn lock_location(
    conn: &mut PgConnection,
    caps: SchemaCapabilities,
    warehouse_id: Uuid,
    product_id: Uuid,
    state: StockState,
) -> AppResult<Option<StockLocation>> {
    let state_filter = if caps.location_state { "AND state = $3" } else { "" };
    let sql = format!(
        "SELECT id, business_id, warehouse_id, product_id, {}, quantity, updated_at \
         FROM stock_locations \
         WHERE warehouse_id = $1 AND product_id = $2 {} \
         FOR UPDATE",
        state_column(caps),
        state_filter,
    );
    let mut query = sqlx::query_as::<_, StockLocation>(&sql)
        .bind(warehouse_id)
        .bind(product_id);
    if caps.location_state {
        query = query.bind(state.as_str());
    }
    let location = query.fetch_optional(&mut *conn).await?;

    Ok(location)
}

/// Add to a location, creating it on first use; returns the new quantity
pub async fn increment_location(
    conn: &mut PgConnection,
    caps: SchemaCapabilities,
    business_id: Uuid,
    warehouse_id: Uuid,
    product_id: Uuid,
    state: StockState,
    quantity: Decimal,
) -> AppResult<Decimal> {
    let balance = if caps.location_state {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO stock_locations (business_id, warehouse_id, product_id, quantity, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (warehouse_id, product_id, state)
            DO UPDATE SET quantity = stock_locations.quantity + EXCLUDED.quantity, updated_at = NOW()
            RETURNING quantity
            "#,
        )
        .bind(business_id)
        .bind(warehouse_id)
        .bind(product_id)
        .bind(quantity)
        .bind(state.as_str())
        .fetch_one(&mut *conn)
        .await?
    } else {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO stock_locations (business_id, warehouse_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (warehouse_id, product_id)
            DO UPDATE SET quantity = stock_locations.quantity + EXCLUDED.quantity, updated_at = NOW()
            RETURNING quantity
            "#,
        )
        .bind(business_id)
        .bind(warehouse_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&mut *conn)
        .await?
    };

    Ok(balance)
}

/// Take from an existing location; returns the new quantity.
///
/// Fails if the row does not exist or would go negative.
pub async fn decrement_location(
    conn: &mut PgConnection,
    caps: SchemaCapabilities,
    warehouse_id: Uuid,
    product_id: Uuid,
    state: StockState,
    quantity: Decimal,
) -> AppResult<Decimal> {
    let location = lock_location(conn, caps, warehouse_id, product_id, state)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock location".to_string()))?;

    if location.quantity < quantity {
        return Err(AppError::InsufficientStock {
            available: location.quantity,
            requested: quantity,
        });
    }

    let balance = sqlx::query_scalar::<_, Decimal>(
        r#"
        UPDATE stock_locations
        SET quantity = quantity - $1, updated_at = NOW()
        WHERE id = $2
        RETURNING quantity
        "#,
    )
    .bind(quantity)
    .bind(location.id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(balance)
}

pub async fn list_locations(
    conn: &mut PgConnection,
    caps: SchemaCapabilities,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Vec<StockLocation>> {
    let locations = sqlx::query_as::<_, StockLocation>(&format!(
        "SELECT id, business_id, warehouse_id, product_id, {}, quantity, updated_at \
         FROM stock_locations \
         WHERE business_id = $1 AND product_id = $2 \
         ORDER BY warehouse_id, updated_at",
        state_column(caps),
    ))
    .bind(business_id)
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(locations)
}
