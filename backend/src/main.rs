use std::sync::Arc;
use std::time::Duration;

use common::logger::init_logger;
use lessons::{
    api,
    config::AppConfig,
    db::Db,
    notify::TracingNotifier,
    payments::HttpPaymentGateway,
    state::AppState,
    store::{SqliteStore, Stores},
};

/// Connects, migrates and wraps the pool in the repository seams.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<(Db, Stores)> {
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
    db.migrate().await?;

    let stores = Stores::sqlite(SqliteStore::new(db.pool.clone()));
    Ok((db, stores))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger("lessons", AppConfig::json_logs_from_env());
    let cfg = AppConfig::from_env();

    tracing::info!("Starting lesson booking service...");

    let (db, stores) = init_store(&cfg).await?;

    let gateway = Arc::new(HttpPaymentGateway::new(
        &cfg.gateway_url,
        &cfg.gateway_secret_key,
        Duration::from_secs(cfg.gateway_timeout_secs),
    )?);
    if cfg.gateway_secret_key.is_empty() {
        tracing::warn!("PAYMENT_GATEWAY_SECRET_KEY unset; outbound payment calls will fail");
    }
    if cfg.webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET unset; all gateway notifications will be rejected");
    }

    let state = AppState::new(
        db.pool.clone(),
        &stores,
        gateway,
        Arc::new(TracingNotifier),
        &cfg,
    );

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = ?e, "failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    db.pool.close().await;
    Ok(())
}
