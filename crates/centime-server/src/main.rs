mod config;
mod error;
mod web;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use centime_net::{NetConfig, PeerManager};
use centime_store::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,centime_server=debug")),
        )
        .init();

    info!("Starting centime v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!(
        db = %config.db_path.display(),
        dht_port = config.dht_port,
        http = %config.http_addr,
        "Loaded configuration"
    );

    let store = Arc::new(Database::open(&config.db_path)?);

    let pm = PeerManager::start(
        Arc::clone(&store),
        NetConfig {
            port: config.dht_port,
            secret: config.secret.clone(),
        },
    )
    .await?;

    let state = web::AppState { store, pm };
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "web UI listening");

    tokio::select! {
        result = axum::serve(listener, web::build_router(state)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
