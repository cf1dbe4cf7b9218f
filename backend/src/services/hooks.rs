//! Post-commit orchestration hooks
//!
//! Committed stock events are handed to a [`HookWorker`] over a bounded
//! channel. Hooks run on the worker task, never on the caller's path, and a
//! failing hook is logged and reported on the failure channel only.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::Reference;
use sqlx::PgPool;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::HooksConfig;

/// What happened to the stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockEventKind {
    Added,
    Removed,
    Transferred,
    Adjusted,
    Reserved,
    Released,
}

/// A committed stock change, as published to hooks
#[derive(Debug, Clone, Serialize)]
pub struct StockEvent {
    pub kind: StockEventKind,
    pub business_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub quantity_change: Decimal,
    /// Product-wide stock after the change
    pub new_stock: Decimal,
    pub reference: Option<Reference>,
    pub occurred_at: DateTime<Utc>,
}

impl StockEvent {
    pub fn new(kind: StockEventKind, business_id: Uuid, product_id: Uuid) -> Self {
        Self {
            kind,
            business_id,
            product_id,
            warehouse_id: None,
            quantity_change: Decimal::ZERO,
            new_stock: Decimal::ZERO,
            reference: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn at(mut self, warehouse_id: Uuid) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn change(mut self, quantity_change: Decimal, new_stock: Decimal) -> Self {
        self.quantity_change = quantity_change;
        self.new_stock = new_stock;
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// A hook that failed on an event
#[derive(Debug, Clone)]
pub struct HookFailure {
    pub hook: &'static str,
    pub event: StockEvent,
    pub error: String,
}

/// Sending side handed to every unit of work. Never blocks: when the queue is
/// full the event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct HookDispatcher {
    sender: Option<mpsc::Sender<StockEvent>>,
}

impl HookDispatcher {
    /// A dispatcher that discards everything
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn dispatch(&self, event: StockEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    kind = ?event.kind,
                    product_id = %event.product_id,
                    "hook queue full, stock event dropped"
                );
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(
                    kind = ?event.kind,
                    product_id = %event.product_id,
                    "hook worker stopped, stock event dropped"
                );
            }
        }
    }
}

/// Records an open reorder alert when outbound stock reaches the reorder level
#[derive(Debug, Clone)]
pub struct ReorderEvaluator {
    db: PgPool,
}

impl ReorderEvaluator {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn handle(&self, event: &StockEvent) -> anyhow::Result<()> {
        if event.quantity_change >= Decimal::ZERO {
            return Ok(());
        }

        let levels = sqlx::query_as::<_, (Decimal, Option<Decimal>, Option<Decimal>)>(
            "SELECT stock, reorder_level, reorder_quantity FROM products WHERE id = $1 AND business_id = $2",
        )
        .bind(event.product_id)
        .bind(event.business_id)
        .fetch_optional(&self.db)
        .await?;

        let Some((stock, Some(reorder_level), reorder_quantity)) = levels else {
            return Ok(());
        };
        if stock > reorder_level {
            return Ok(());
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO reorder_alerts (business_id, product_id, stock_at_trigger, reorder_level, suggested_quantity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id) WHERE status = 'open' DO NOTHING
            "#,
        )
        .bind(event.business_id)
        .bind(event.product_id)
        .bind(stock)
        .bind(reorder_level)
        .bind(reorder_quantity)
        .execute(&self.db)
        .await?
        .rows_affected();

        if inserted > 0 {
            tracing::info!(
                business_id = %event.business_id,
                product_id = %event.product_id,
                %stock,
                %reorder_level,
                "reorder alert opened"
            );
        }
        Ok(())
    }
}

/// POSTs committed events as JSON to an external endpoint
#[derive(Debug, Clone)]
pub struct ExternalSync {
    endpoint: String,
    http_client: reqwest::Client,
}

impl ExternalSync {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
        })
    }

    async fn handle(&self, event: &StockEvent) -> anyhow::Result<()> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("sync endpoint answered {}", response.status());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Hook {
    Reorder(ReorderEvaluator),
    ExternalSync(ExternalSync),
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Hook::Reorder(_) => "reorder",
            Hook::ExternalSync(_) => "external_sync",
        }
    }

    async fn handle(&self, event: &StockEvent) -> anyhow::Result<()> {
        match self {
            Hook::Reorder(hook) => hook.handle(event).await,
            Hook::ExternalSync(hook) => hook.handle(event).await,
        }
    }
}

/// Build the configured hook set
pub fn configured_hooks(config: &HooksConfig, db: &PgPool) -> anyhow::Result<Vec<Hook>> {
    let mut hooks = Vec::new();
    if config.reorder_enabled {
        hooks.push(Hook::Reorder(ReorderEvaluator::new(db.clone())));
    }
    if let Some(endpoint) = config.sync_endpoint.as_deref().filter(|e| !e.is_empty()) {
        hooks.push(Hook::ExternalSync(ExternalSync::new(
            endpoint,
            Duration::from_secs(config.sync_timeout_secs),
        )?));
    }
    Ok(hooks)
}

pub struct HookWorker;

impl HookWorker {
    /// Start the worker task.
    ///
    /// The task runs until every dispatcher clone has been dropped. Failures
    /// are also pushed to the returned receiver; when nobody drains it fast
    /// enough they are only logged.
    pub fn spawn(
        hooks: Vec<Hook>,
        capacity: usize,
    ) -> (HookDispatcher, mpsc::Receiver<HookFailure>, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (sender, mut events) = mpsc::channel::<StockEvent>(capacity);
        let (failure_tx, failures) = mpsc::channel::<HookFailure>(capacity);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                for hook in &hooks {
                    if let Err(e) = hook.handle(&event).await {
                        tracing::error!(
                            hook = hook.name(),
                            kind = ?event.kind,
                            product_id = %event.product_id,
                            error = %e,
                            "stock hook failed"
                        );
                        let failure = HookFailure {
                            hook: hook.name(),
                            event: event.clone(),
                            error: e.to_string(),
                        };
                        if failure_tx.try_send(failure).is_err() {
                            tracing::debug!("hook failure channel full or closed");
                        }
                    }
                }
            }
            tracing::debug!("hook worker stopped");
        });

        (
            HookDispatcher {
                sender: Some(sender),
            },
            failures,
            handle,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound_event() -> StockEvent {
        StockEvent::new(StockEventKind::Removed, Uuid::new_v4(), Uuid::new_v4())
            .change(Decimal::from(-2), Decimal::from(3))
    }

    #[test]
    fn test_disabled_dispatcher_discards() {
        HookDispatcher::disabled().dispatch(outbound_event());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (sender, mut receiver) = mpsc::channel(1);
        let dispatcher = HookDispatcher {
            sender: Some(sender),
        };

        dispatcher.dispatch(outbound_event());
        dispatcher.dispatch(outbound_event());

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_sync_is_reported() {
        let sync = ExternalSync::new("http://127.0.0.1:1/events", Duration::from_secs(2))
            .expect("client builds");
        let (dispatcher, mut failures, handle) = HookWorker::spawn(vec![Hook::ExternalSync(sync)], 8);

        let event = outbound_event();
        let product_id = event.product_id;
        dispatcher.dispatch(event);

        let failure = failures.recv().await.expect("failure reported");
        assert_eq!(failure.hook, "external_sync");
        assert_eq!(failure.event.product_id, product_id);

        drop(dispatcher);
        handle.await.expect("worker exits cleanly");
    }

    #[test]
    fn test_event_serializes_reference() {
        let reference = Reference::new(shared::ReferenceType::Sale, Uuid::new_v4());
        let event = outbound_event().reference(reference);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "removed");
        assert_eq!(json["reference"]["type"], "sale");
    }
}
