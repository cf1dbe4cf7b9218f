//! General-ledger posting for stock movements

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{ensure_balanced, JournalLine, Reference};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{accounts, GlEntry, TrialBalanceRow};

/// Lines written under one posting id
#[derive(Debug, Clone, Serialize)]
pub struct Posting {
    pub posting_id: Uuid,
    pub total: Decimal,
    pub entries: Vec<GlEntry>,
}

/// Writes balanced postings inside the caller's transaction
pub struct GlPoster;

impl GlPoster {
    /// Post `lines` against the business's chart of accounts.
    ///
    /// The balance check runs before anything is written. A posting whose
    /// total is zero writes nothing and returns `None`.
    pub async fn post(
        conn: &mut PgConnection,
        business_id: Uuid,
        reference: Reference,
        description: &str,
        lines: &[JournalLine],
    ) -> AppResult<Option<Posting>> {
        let total = ensure_balanced(lines)?;
        if total.is_zero() {
            tracing::debug!(%business_id, reference = %reference.kind, "zero-value posting skipped");
            return Ok(None);
        }

        let chart = Self::resolve_chart(conn, business_id).await?;

        let posting_id = Uuid::new_v4();
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines.iter().filter(|l| !(l.debit.is_zero() && l.credit.is_zero())) {
            let account_id = chart.get(line.role.as_str()).copied().ok_or_else(|| {
                AppError::AccountingPostingFailed(format!(
                    "no account mapped to role '{}'",
                    line.role.as_str()
                ))
            })?;
            let entry = accounts::insert_gl_line(
                conn,
                business_id,
                posting_id,
                account_id,
                line.debit,
                line.credit,
                description,
                reference,
            )
            .await?;
            entries.push(entry);
        }

        tracing::debug!(
            %business_id,
            %posting_id,
            reference = %reference.kind,
            reference_id = %reference.id,
            %total,
            lines = entries.len(),
            "posted journal"
        );

        Ok(Some(Posting {
            posting_id,
            total,
            entries,
        }))
    }

    /// Book a compensating posting that swaps every line recorded for `reference`
    pub async fn reverse_reference(
        conn: &mut PgConnection,
        business_id: Uuid,
        reference: Reference,
        description: &str,
    ) -> AppResult<Option<Posting>> {
        let existing = accounts::lines_by_reference(conn, business_id, reference).await?;
        if existing.is_empty() {
            return Ok(None);
        }

        let debit: Decimal = existing.iter().map(|e| e.debit).sum();
        let credit: Decimal = existing.iter().map(|e| e.credit).sum();
        if debit != credit {
            return Err(AppError::AccountingImbalance { debit, credit });
        }

        let posting_id = Uuid::new_v4();
        let mut entries = Vec::with_capacity(existing.len());
        for line in &existing {
            let entry = accounts::insert_gl_line(
                conn,
                business_id,
                posting_id,
                line.account_id,
                line.credit,
                line.debit,
                description,
                reference,
            )
            .await?;
            entries.push(entry);
        }

        tracing::info!(%business_id, %posting_id, reference = %reference.kind, reference_id = %reference.id, "reversed postings");

        Ok(Some(Posting {
            posting_id,
            total: debit,
            entries,
        }))
    }

    /// Remove every line of a reference ahead of reposting an edited document
    pub async fn delete_by_reference(
        conn: &mut PgConnection,
        business_id: Uuid,
        reference: Reference,
    ) -> AppResult<u64> {
        let deleted = accounts::delete_by_reference(conn, business_id, reference).await?;
        tracing::info!(%business_id, reference = %reference.kind, reference_id = %reference.id, deleted, "deleted postings");
        Ok(deleted)
    }

    /// Role -> account id, provisioning the default chart on first use
    async fn resolve_chart(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> AppResult<HashMap<String, Uuid>> {
        let mut accounts_by_role = accounts::role_accounts(conn, business_id).await?;
        if accounts_by_role.is_empty() {
            let created = accounts::provision_default_chart(conn, business_id).await?;
            tracing::info!(%business_id, created, "provisioned default chart of accounts");
            accounts_by_role = accounts::role_accounts(conn, business_id).await?;
        }

        Ok(accounts_by_role
            .into_iter()
            .filter_map(|a| a.role.map(|role| (role, a.id)))
            .collect())
    }
}

/// Read side of the general ledger plus reference-scoped reposting
#[derive(Clone)]
pub struct AccountingService {
    db: PgPool,
}

impl AccountingService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn lines_by_reference(
        &self,
        business_id: Uuid,
        reference: Reference,
    ) -> AppResult<Vec<GlEntry>> {
        let mut conn = self.db.acquire().await?;
        accounts::lines_by_reference(&mut conn, business_id, reference).await
    }

    pub async fn trial_balance(&self, business_id: Uuid) -> AppResult<Vec<TrialBalanceRow>> {
        let mut conn = self.db.acquire().await?;
        accounts::trial_balance(&mut conn, business_id).await
    }

    /// Replace the postings of an edited document in one transaction
    pub async fn repost(
        &self,
        business_id: Uuid,
        reference: Reference,
        description: &str,
        lines: &[JournalLine],
    ) -> AppResult<Option<Posting>> {
        // Reject before deleting anything
        ensure_balanced(lines)?;

        let mut tx = self.db.begin().await?;
        GlPoster::delete_by_reference(&mut tx, business_id, reference).await?;
        let posting = GlPoster::post(&mut tx, business_id, reference, description, lines).await?;
        tx.commit().await?;
        Ok(posting)
    }

    /// Reverse a reference's postings in their own transaction
    pub async fn reverse(
        &self,
        business_id: Uuid,
        reference: Reference,
        description: &str,
    ) -> AppResult<Option<Posting>> {
        let mut tx = self.db.begin().await?;
        let posting = GlPoster::reverse_reference(&mut tx, business_id, reference, description).await?;
        tx.commit().await?;
        Ok(posting)
    }
}
