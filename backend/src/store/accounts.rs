//! Chart of accounts and general-ledger lines

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{Reference, DEFAULT_CHART};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub business_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GlEntry {
    pub id: Uuid,
    pub business_id: Uuid,
    pub posting_id: Uuid,
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub posted_at: DateTime<Utc>,
}

/// Per-account totals across every posting of a business
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TrialBalanceRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// Accounts that carry a logical role
pub async fn role_accounts(conn: &mut PgConnection, business_id: Uuid) -> AppResult<Vec<Account>> {
    let accounts = sqlx::query_as::<_, Account>(
        r#"
        SELECT id, business_id, code, name, account_type, role, created_at
        FROM accounts
        WHERE business_id = $1 AND role IS NOT NULL
        ORDER BY code
        "#,
    )
    .bind(business_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(accounts)
}

/// Insert the default chart; rows that already exist are left alone
pub async fn provision_default_chart(conn: &mut PgConnection, business_id: Uuid) -> AppResult<u64> {
    let mut created = 0;
    for account in DEFAULT_CHART {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (business_id, code, name, account_type, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(business_id)
        .bind(account.code)
        .bind(account.name)
        .bind(account.account_type.as_str())
        .bind(account.role.as_str())
        .execute(&mut *conn)
        .await?;
        created += result.rows_affected();
    }

    Ok(created)
}

pub async fn insert_gl_line(
    conn: &mut PgConnection,
    business_id: Uuid,
    posting_id: Uuid,
    account_id: Uuid,
    debit: Decimal,
    credit: Decimal,
    description: &str,
    reference: Reference,
) -> AppResult<GlEntry> {
    let entry = sqlx::query_as::<_, GlEntry>(
        r#"
        INSERT INTO gl_entries (business_id, posting_id, account_id, debit, credit, description,
                                reference_type, reference_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, business_id, posting_id, account_id, debit, credit, description,
                  reference_type, reference_id, posted_at
        "#,
    )
    .bind(business_id)
    .bind(posting_id)
    .bind(account_id)
    .bind(debit)
    .bind(credit)
    .bind(description)
    .bind(reference.kind.as_str())
    .bind(reference.id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(entry)
}

pub async fn lines_by_reference(
    conn: &mut PgConnection,
    business_id: Uuid,
    reference: Reference,
) -> AppResult<Vec<GlEntry>> {
    let lines = sqlx::query_as::<_, GlEntry>(
        r#"
        SELECT id, business_id, posting_id, account_id, debit, credit, description,
               reference_type, reference_id, posted_at
        FROM gl_entries
        WHERE business_id = $1 AND reference_type = $2 AND reference_id = $3
        ORDER BY posted_at, id
        "#,
    )
    .bind(business_id)
    .bind(reference.kind.as_str())
    .bind(reference.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lines)
}

pub async fn delete_by_reference(
    conn: &mut PgConnection,
    business_id: Uuid,
    reference: Reference,
) -> AppResult<u64> {
    let result = sqlx::query(
        "DELETE FROM gl_entries WHERE business_id = $1 AND reference_type = $2 AND reference_id = $3",
    )
    .bind(business_id)
    .bind(reference.kind.as_str())
    .bind(reference.id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn trial_balance(conn: &mut PgConnection, business_id: Uuid) -> AppResult<Vec<TrialBalanceRow>> {
    let rows = sqlx::query_as::<_, TrialBalanceRow>(
        r#"
        SELECT a.id AS account_id, a.code, a.name,
               COALESCE(SUM(g.debit), 0) AS debit,
               COALESCE(SUM(g.credit), 0) AS credit
        FROM accounts a
        LEFT JOIN gl_entries g ON g.account_id = a.id
        WHERE a.business_id = $1
        GROUP BY a.id, a.code, a.name
        ORDER BY a.code
        "#,
    )
    .bind(business_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
