//! Pool setup, schema capabilities, and the transaction handle primitives share

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, Transaction};

use crate::config::DatabaseConfig;
use crate::error::AppResult;
use crate::services::hooks::{HookDispatcher, StockEvent};

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Optional schema features, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCapabilities {
    /// `stock_locations.state` exists and is part of the location key
    pub location_state: bool,
}

impl SchemaCapabilities {
    /// Everything the embedded migrations provide
    pub fn full() -> Self {
        Self {
            location_state: true,
        }
    }

    pub async fn detect(pool: &PgPool) -> AppResult<Self> {
        let location_state = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.columns
                WHERE table_schema = current_schema()
                  AND table_name = 'stock_locations'
                  AND column_name = 'state'
            )
            "#,
        )
        .fetch_one(pool)
        .await?;

        let caps = Self { location_state };
        tracing::info!(?caps, "schema capabilities detected");
        Ok(caps)
    }
}

/// One database transaction plus the stock events it will publish.
///
/// Primitives write through [`UnitOfWork::conn`] and queue events with
/// [`UnitOfWork::defer`]; events reach the hook worker only after
/// [`UnitOfWork::commit`] succeeds. Dropping the handle rolls back.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
    events: Vec<StockEvent>,
    hooks: HookDispatcher,
}

impl UnitOfWork {
    pub async fn begin(pool: &PgPool, hooks: HookDispatcher, lock_timeout_ms: u64) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        if lock_timeout_ms > 0 {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{lock_timeout_ms}ms"))
                .execute(&mut *tx)
                .await?;
        }
        Ok(Self {
            tx,
            events: Vec::new(),
            hooks,
        })
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    pub fn defer(&mut self, event: StockEvent) {
        self.events.push(event);
    }

    pub fn pending_events(&self) -> &[StockEvent] {
        &self.events
    }

    pub async fn commit(self) -> AppResult<()> {
        let Self { tx, events, hooks } = self;
        tx.commit().await?;
        for event in events {
            hooks.dispatch(event);
        }
        Ok(())
    }

    pub async fn rollback(self) -> AppResult<()> {
        if !self.events.is_empty() {
            tracing::debug!(dropped = self.events.len(), "rolling back; stock events discarded");
        }
        self.tx.rollback().await?;
        Ok(())
    }
}
