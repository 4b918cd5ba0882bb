//! HTTP/WebSocket server for aegamond.

use crate::aggregator::Aggregator;
use crate::config::MonitorConfig;
use crate::dispatch::Dispatcher;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub aggregator: Arc<RwLock<Aggregator>>,
    pub dispatcher: Dispatcher,
    pub config: Arc<MonitorConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        aggregator: Arc<RwLock<Aggregator>>,
        dispatcher: Dispatcher,
        config: Arc<MonitorConfig>,
    ) -> Self {
        Self {
            aggregator,
            dispatcher,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Run the HTTP server until shutdown is signaled.
pub async fn run(state: AppState) -> Result<()> {
    let state = Arc::new(state);
    let addr = state.config.bind_addr.clone();

    // The dashboard is served from another origin (the React dev server),
    // so the API answers cross-origin requests.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::api_routes())
        .merge(routes::ws_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed binding {}", addr))?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
