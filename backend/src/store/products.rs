//! Product rows: aggregate stock and weighted-average cost

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::UnitConversions;
use sqlx::{types::Json, FromRow, PgConnection};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Product with its denormalized stock total
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub business_id: Uuid,
    pub sku: String,
    pub name: String,
    pub base_unit: String,
    pub unit_conversions: Json<HashMap<String, Decimal>>,
    pub stock: Decimal,
    pub cost_price: Decimal,
    pub reorder_level: Option<Decimal>,
    pub reorder_quantity: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn conversions(&self) -> UnitConversions {
        UnitConversions(self.unit_conversions.0.clone())
    }

    /// Inventory value at the current weighted-average cost
    pub fn stock_value(&self) -> Decimal {
        shared::extended_value(self.stock, self.cost_price)
    }
}

/// Catalog data for a product that has never held stock
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 30))]
    pub base_unit: String,
    #[serde(default)]
    pub unit_conversions: HashMap<String, Decimal>,
    pub reorder_level: Option<Decimal>,
    pub reorder_quantity: Option<Decimal>,
}

const PRODUCT_COLUMNS: &str = "id, business_id, sku, name, base_unit, unit_conversions, stock, \
     cost_price, reorder_level, reorder_quantity, is_active, created_at, updated_at";

/// Lock the product row for the rest of the transaction
pub async fn lock_product(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Product> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE id = $1 AND business_id = $2 AND is_active = true \
         FOR UPDATE"
    ))
    .bind(product_id)
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Product".to_string()))
}

pub async fn get_product(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
) -> AppResult<Product> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND business_id = $2"
    ))
    .bind(product_id)
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Product".to_string()))
}

pub async fn create_product(
    conn: &mut PgConnection,
    business_id: Uuid,
    input: &NewProduct,
) -> AppResult<Product> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "INSERT INTO products (business_id, sku, name, base_unit, unit_conversions, \
                               reorder_level, reorder_quantity) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(business_id)
    .bind(&input.sku)
    .bind(&input.name)
    .bind(&input.base_unit)
    .bind(Json(&input.unit_conversions))
    .bind(input.reorder_level)
    .bind(input.reorder_quantity)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::validation("sku", format!("SKU {} already exists", input.sku))
        }
        _ => e.into(),
    })?;

    Ok(product)
}

/// Write the new aggregate stock and cost; callers hold the row lock
pub async fn update_stock(
    conn: &mut PgConnection,
    product_id: Uuid,
    stock: Decimal,
    cost_price: Decimal,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE products
        SET stock = $1, cost_price = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(stock)
    .bind(cost_price)
    .bind(product_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
