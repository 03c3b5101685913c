//! Web server module.

mod handlers;
mod response;

pub use handlers::*;
pub use response::*;

use crate::cluster::{Discovery, HttpCoordinatorProbe};
use crate::config::ServerConfig;
use crate::monitor::Lifecycle;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub discovery: Arc<Discovery<HttpCoordinatorProbe>>,
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/", get(handlers::handle_root))
        // API endpoints
        .route(
            "/reservation",
            get(handlers::handle_list_reservations).post(handlers::handle_create_reservation),
        )
        .route("/reservation/{app}/{component}", get(handlers::handle_get_reservation))
        .route("/checkin", post(handlers::handle_checkin))
        .route("/checkout", post(handlers::handle_checkout))
        .route("/snooze", post(handlers::handle_snooze))
        .route("/is-coordinator", get(handlers::handle_is_coordinator))
        .route("/api/nodes", get(handlers::handle_api_nodes))
        .route("/api/badguests", get(handlers::handle_api_bad_guests))
        // Pages
        .route("/status", get(handlers::handle_status_page))
        .route("/nodes", get(handlers::handle_nodes_page))
        .route("/badguests", get(handlers::handle_bad_guests_page))
        .method_not_allowed_fallback(handlers::handle_invalid_method)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// Web server for Vigil.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        lifecycle: Arc<Lifecycle>,
        discovery: Arc<Discovery<HttpCoordinatorProbe>>,
    ) -> Self {
        Self {
            config,
            state: AppState { lifecycle, discovery },
        }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = build_router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
