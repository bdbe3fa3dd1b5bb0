use std::sync::Arc;

use tracing::{info, warn};

use chatter_db::Database;
use chatter_gateway::Hub;
use chatter_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatter=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_dev_secret() {
        warn!("CHATTER_JWT_SECRET is unset or a placeholder; tokens are forgeable");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    let hub = Hub::new();

    let state = chatter_server::app_state(&config, db, hub.clone());
    let app = chatter_server::router(state, &config.static_dir, config.max_upload_bytes);

    let addr = config.addr()?;
    info!("Chatter server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await?;

    // Upgraded sockets outlive the HTTP server; wait for their cleanup.
    hub.drain().await;
    info!("Chatter server stopped");

    Ok(())
}

async fn shutdown_signal(hub: Hub) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
    hub.shutdown();
}
