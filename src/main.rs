//! Vigil - dead man's switch monitoring service
//!
//! Applications reserve a checkin window and check in periodically; anything
//! that goes quiet for longer than its window is reported as failing.

mod cluster;
mod config;
mod db;
mod monitor;
mod scheduler;
mod web;

use cluster::{Discovery, HttpCoordinatorProbe};
use config::ServerConfig;
use db::Store;
use monitor::Lifecycle;
use scheduler::AlertSweeper;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Vigil on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    if cfg.coordinator {
        tracing::info!("This node is configured as coordinator");
    }

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Reconcile the peer list with configuration, node IDs follow its order
    let removed = store.sync_nodes(&cfg.nodes)?;
    tracing::info!("Registered {} peer nodes ({} removed)", cfg.nodes.len(), removed);

    let lifecycle = Arc::new(Lifecycle::new(store));

    let probe = HttpCoordinatorProbe::new(cfg.peer_timeout, cfg.peer_port)?;
    let discovery = Arc::new(Discovery::new(probe, cfg.peer_timeout, cfg.coordinator));

    // Start alert sweeper
    let sweeper = AlertSweeper::new(lifecycle.clone(), cfg.coordinator, cfg.sweep_interval);
    sweeper.start();

    // Start web server
    let server = Server::new(cfg, lifecycle, discovery);
    server.start().await?;

    Ok(())
}
