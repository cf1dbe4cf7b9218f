//! Serialized units

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::SerialStatus;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Serial {
    pub id: Uuid,
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub serial_number: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Serial {
    pub fn status(&self) -> Option<SerialStatus> {
        SerialStatus::parse(&self.status)
    }

    pub fn is_in_stock(&self) -> bool {
        self.status().is_some_and(|s| s.is_in_stock())
    }
}

/// Lock the named serials of a business, ordered by number
pub async fn lock_serials(
    conn: &mut PgConnection,
    business_id: Uuid,
    serial_numbers: &[String],
) -> AppResult<Vec<Serial>> {
    let serials = sqlx::query_as::<_, Serial>(
        r#"
        SELECT id, business_id, product_id, warehouse_id, batch_id, serial_number, status,
               created_at, updated_at
        FROM serials
        WHERE business_id = $1 AND serial_number = ANY($2)
        ORDER BY serial_number
        FOR UPDATE
        "#,
    )
    .bind(business_id)
    .bind(serial_numbers)
    .fetch_all(&mut *conn)
    .await?;

    Ok(serials)
}

/// Lock exactly the named serials or fail naming the first missing one
pub async fn lock_existing_serials(
    conn: &mut PgConnection,
    business_id: Uuid,
    serial_numbers: &[String],
) -> AppResult<Vec<Serial>> {
    let serials = lock_serials(conn, business_id, serial_numbers).await?;
    if let Some(missing) = serial_numbers
        .iter()
        .find(|n| !serials.iter().any(|s| &s.serial_number == *n))
    {
        return Err(AppError::NotFound(format!("Serial {missing}")));
    }
    Ok(serials)
}

/// Put units on the shelf: new numbers are inserted as available, numbers
/// previously sold come back as returned. A number already in stock is rejected.
pub async fn register_serials(
    conn: &mut PgConnection,
    business_id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    batch_id: Option<Uuid>,
    serial_numbers: &[String],
) -> AppResult<()> {
    let existing = lock_serials(conn, business_id, serial_numbers).await?;

    for number in serial_numbers {
        match existing.iter().find(|s| &s.serial_number == number) {
            Some(serial) if serial.product_id != product_id => {
                return Err(AppError::validation(
                    "serials",
                    format!("Serial {number} belongs to another product"),
                ));
            }
            Some(serial) if serial.is_in_stock() => {
                return Err(AppError::validation(
                    "serials",
                    format!("Serial {number} is already in stock"),
                ));
            }
            Some(serial) => {
                sqlx::query(
                    r#"
                    UPDATE serials
                    SET status = $1, warehouse_id = $2, batch_id = COALESCE($3, batch_id),
                        updated_at = NOW()
                    WHERE id = $4
                    "#,
                )
                .bind(SerialStatus::Returned.as_str())
                .bind(warehouse_id)
                .bind(batch_id)
                .bind(serial.id)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO serials (business_id, product_id, warehouse_id, batch_id, serial_number, status)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(business_id)
                .bind(product_id)
                .bind(warehouse_id)
                .bind(batch_id)
                .bind(number)
                .bind(SerialStatus::Available.as_str())
                .execute(&mut *conn)
                .await?;
            }
        }
    }

    Ok(())
}

pub async fn set_serial_status(
    conn: &mut PgConnection,
    serial_ids: &[Uuid],
    status: SerialStatus,
) -> AppResult<()> {
    sqlx::query("UPDATE serials SET status = $1, updated_at = NOW() WHERE id = ANY($2)")
        .bind(status.as_str())
        .bind(serial_ids)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn move_serials(
    conn: &mut PgConnection,
    serial_ids: &[Uuid],
    warehouse_id: Uuid,
) -> AppResult<()> {
    sqlx::query("UPDATE serials SET warehouse_id = $1, updated_at = NOW() WHERE id = ANY($2)")
        .bind(warehouse_id)
        .bind(serial_ids)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Serials travel with their batch when the batch is relocated
pub async fn move_batch_serials(
    conn: &mut PgConnection,
    batch_id: Uuid,
    warehouse_id: Uuid,
) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE serials SET warehouse_id = $1, updated_at = NOW() WHERE batch_id = $2 AND status <> 'sold'",
    )
    .bind(warehouse_id)
    .bind(batch_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
