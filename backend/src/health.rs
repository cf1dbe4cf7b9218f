//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::Engine;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub location_state: bool,
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// The process is up
async fn health() -> &'static str {
    "OK"
}

/// The database answers; 503 otherwise
async fn ready(State(engine): State<Engine>) -> (StatusCode, Json<HealthResponse>) {
    let (code, database) = match sqlx::query("SELECT 1").execute(&engine.db).await {
        Ok(_) => (StatusCode::OK, "connected"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "disconnected")
        }
    };

    (
        code,
        Json(HealthResponse {
            status: if code.is_success() { "ready" } else { "unavailable" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
            location_state: engine.capabilities.location_state,
        }),
    )
}
