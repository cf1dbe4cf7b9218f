//! Multi-tenant stock transaction engine
//!
//! Stock mutations (add, remove, transfer, adjust), batch allocation,
//! reservations and general-ledger posting over one PostgreSQL store.
//! Callers are expected to have authorized the business before calling in.

pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod services;
pub mod store;

use std::sync::Arc;

use sqlx::PgPool;

pub use crate::config::Config;
pub use db::{SchemaCapabilities, UnitOfWork};
pub use error::{AppError, AppResult, ErrorKind, Failure};

use services::{AccountingService, HookDispatcher, ReservationService, StockService};

/// Shared handles for every service; cheap to clone
#[derive(Clone)]
pub struct Engine {
    pub db: PgPool,
    pub capabilities: SchemaCapabilities,
    pub hooks: HookDispatcher,
    pub lock_timeout_ms: u64,
    pub config: Option<Arc<Config>>,
}

impl Engine {
    pub fn new(
        db: PgPool,
        capabilities: SchemaCapabilities,
        hooks: HookDispatcher,
        lock_timeout_ms: u64,
    ) -> Self {
        Self {
            db,
            capabilities,
            hooks,
            lock_timeout_ms,
            config: None,
        }
    }

    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn stock(&self) -> StockService {
        StockService::new(
            self.db.clone(),
            self.capabilities,
            self.hooks.clone(),
            self.lock_timeout_ms,
        )
    }

    pub fn reservations(&self) -> ReservationService {
        ReservationService::new(self.db.clone(), self.hooks.clone(), self.lock_timeout_ms)
    }

    pub fn accounting(&self) -> AccountingService {
        AccountingService::new(self.db.clone())
    }

    /// Open a unit of work for composing several primitives atomically
    pub async fn begin(&self) -> AppResult<UnitOfWork> {
        UnitOfWork::begin(&self.db, self.hooks.clone(), self.lock_timeout_ms).await
    }
}
