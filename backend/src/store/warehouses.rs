//! Warehouse lookup and primary-warehouse resolution

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Warehouse {
    pub id: Uuid,
    pub business_id: Uuid,
    pub code: String,
    pub name: String,
    pub is_primary: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn find_warehouse(
    conn: &mut PgConnection,
    business_id: Uuid,
    warehouse_id: Uuid,
) -> AppResult<Option<Warehouse>> {
    let warehouse = sqlx::query_as::<_, Warehouse>(
        r#"
        SELECT id, business_id, code, name, is_primary, is_active, created_at
        FROM warehouses
        WHERE id = $1 AND business_id = $2 AND is_active = true
        "#,
    )
    .bind(warehouse_id)
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(warehouse)
}

/// The flagged primary warehouse, else the oldest active one
pub async fn primary_warehouse(
    conn: &mut PgConnection,
    business_id: Uuid,
) -> AppResult<Option<Warehouse>> {
    let warehouse = sqlx::query_as::<_, Warehouse>(
        r#"
        SELECT id, business_id, code, name, is_primary, is_active, created_at
        FROM warehouses
        WHERE business_id = $1 AND is_active = true
        ORDER BY is_primary DESC, created_at ASC
        LIMIT 1
        "#,
    )
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(warehouse)
}

pub async fn create_warehouse(
    conn: &mut PgConnection,
    business_id: Uuid,
    code: &str,
    name: &str,
    is_primary: bool,
) -> AppResult<Warehouse> {
    let warehouse = sqlx::query_as::<_, Warehouse>(
        r#"
        INSERT INTO warehouses (business_id, code, name, is_primary)
        VALUES ($1, $2, $3, $4)
        RETURNING id, business_id, code, name, is_primary, is_active, created_at
        "#,
    )
    .bind(business_id)
    .bind(code)
    .bind(name)
    .bind(is_primary)
    .fetch_one(&mut *conn)
    .await?;

    Ok(warehouse)
}

/// Resolve the warehouse a mutation lands in.
///
/// An explicit id must belong to the business. Without one the primary
/// warehouse is used, and a business with no warehouse at all gets one
/// created so stock never ends up warehouse-less.
pub async fn resolve_warehouse(
    conn: &mut PgConnection,
    business_id: Uuid,
    requested: Option<Uuid>,
) -> AppResult<Uuid> {
    if let Some(warehouse_id) = requested {
        return find_warehouse(conn, business_id, warehouse_id)
            .await?
            .map(|w| w.id)
            .ok_or_else(|| AppError::NotFound("Warehouse".to_string()));
    }

    if let Some(primary) = primary_warehouse(conn, business_id).await? {
        return Ok(primary.id);
    }

    // A concurrent first stock-in may race us to the partial unique index
    let created = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO warehouses (business_id, code, name, is_primary)
        VALUES ($1, 'MAIN', 'Main Warehouse', true)
        ON CONFLICT DO NOTHING
        RETURNING id
        "#,
    )
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::WarehouseResolutionFailed(e.to_string()))?;

    if let Some(id) = created {
        tracing::info!(%business_id, warehouse_id = %id, "created primary warehouse");
        return Ok(id);
    }

    primary_warehouse(conn, business_id)
        .await?
        .map(|w| w.id)
        .ok_or_else(|| {
            AppError::WarehouseResolutionFailed(format!(
                "no warehouse could be resolved or created for business {business_id}"
            ))
        })
}
