//! Stock engine process: migrations, hook worker, and health probes

use std::{net::SocketAddr, sync::Arc};

use stock_engine::{
    db,
    services::hooks::{configured_hooks, HookWorker},
    Config, Engine, SchemaCapabilities,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stock_engine=debug,tower_http=debug,sqlx=warn".into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting stock engine");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = db::connect(&config.database).await?;
    tracing::info!("Database connection established");

    if config.database.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let capabilities = SchemaCapabilities::detect(&db_pool).await?;

    // Post-commit hooks
    let hooks = configured_hooks(&config.hooks, &db_pool)?;
    tracing::info!(hooks = hooks.len(), "starting hook worker");
    let (dispatcher, mut failures, worker) = HookWorker::spawn(hooks, config.hooks.queue_capacity);
    let failure_drain = tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            tracing::warn!(
                hook = failure.hook,
                product_id = %failure.event.product_id,
                error = %failure.error,
                "hook failure recorded"
            );
        }
    });

    let engine = Engine::new(
        db_pool,
        capabilities,
        dispatcher,
        config.database.lock_timeout_ms,
    )
    .with_config(Arc::new(config.clone()));

    // Start probe server
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, stock_engine::health::router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last dispatcher; the worker drains and exits
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "hook worker panicked");
    }
    failure_drain.abort();
    tracing::info!("Stock engine stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
