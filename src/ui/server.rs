//! Status and control web server

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::audio::manager::DeviceManager;
use crate::control::Control;
use crate::engine::AudioEngine;
use crate::shutdown::Shutdown;
use crate::ui::{handlers, websocket};

/// Shared state for the handlers
pub struct AppState {
    pub control: Arc<Control>,
    pub devices: Arc<DeviceManager>,
    pub engine: Arc<AudioEngine>,
    pub shutdown: Shutdown,
    pub started: Instant,
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/reset", post(handlers::reset_devices))
        .route("/api/shutdown", post(handlers::request_shutdown))
        .route("/api/transmitting", put(handlers::set_transmitting))
        .route("/api/deafened", put(handlers::set_deafened))
        .route("/ws", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server for the status page and control API
pub struct WebServer {
    bind_address: String,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(bind_address: impl Into<String>, state: Arc<AppState>) -> Self {
        Self {
            bind_address: bind_address.into(),
            state,
        }
    }

    /// Serve until shutdown is requested
    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = self.state.shutdown.clone();
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        tracing::info!(addr = %self.bind_address, "Status server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::task::spawn_blocking(move || shutdown.wait()).await;
            })
            .await?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}
