mod analytics;
mod api;
mod catalog;
mod client;
mod collector;
mod config;
mod db;
mod error;
mod shutdown;
mod types;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analytics::Analytics;
use crate::api::routes::{router, ApiState};
use crate::client::MarketClient;
use crate::collector::Collector;
use crate::config::Config;
use crate::db::Storage;
use crate::error::Result;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let storage = Storage::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Collector ---
    let client = MarketClient::new(&cfg)?;
    let analytics = Analytics::new(storage.clone());
    let collector = Collector::new(cfg.clone(), client, storage, analytics.clone());

    if cfg.collector_enabled {
        collector.start();
    } else {
        warn!("COLLECTOR_ENABLED=false: serving stored data only, upstream is never polled");
    }

    // --- HTTP API server ---
    let app = router(ApiState {
        analytics,
        collector: collector.clone(),
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down collector");
    collector.stop().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
