//! HTTP server setup and routing
//!
//! Control surface for the operator dashboard and the shot logger: mode,
//! sessions, calibration, queries and the SSE event stream.

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::localization::{ChannelPosition, SensorGeometry};
use crate::scoring::EngineHandle;
use crate::state::SharedState;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub handle: EngineHandle,
    pub state: Arc<SharedState>,
    pub config: Arc<EngineConfig>,
    /// Sensor positions as configured; fixed for the process lifetime
    pub channels: Arc<Vec<ChannelPosition>>,
}

impl AppContext {
    pub fn new(handle: EngineHandle, state: Arc<SharedState>, config: Arc<EngineConfig>) -> Result<Self> {
        let geometry = SensorGeometry::from_config(&config.geometry)?;
        Ok(Self {
            handle,
            state,
            config,
            channels: Arc::new(geometry.describe()),
        })
    }
}

/// Build the router with every route attached
pub fn create_router(ctx: AppContext) -> Router {
    use super::handlers;

    Router::new()
        // Health endpoint
        .route("/health", get(handlers::health))
        // Mode control
        .route("/api/mode", get(handlers::get_mode).post(handlers::set_mode))
        // Session control
        .route("/api/session/start", post(handlers::start_session))
        .route("/api/session/end", post(handlers::end_session))
        .route("/api/session", get(handlers::current_session))
        .route("/api/sessions", get(handlers::list_sessions))
        .route(
            "/api/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/sessions/:id/stats", get(handlers::session_stats))
        // Scorecard and shots
        .route("/api/state", get(handlers::get_state))
        .route("/api/shots", get(handlers::list_shots))
        .route("/api/shots/:id/ground_truth", post(handlers::annotate_shot))
        // Static configuration
        .route("/api/config", get(handlers::get_config))
        .route("/api/config/rings", post(handlers::set_rings))
        // Calibration
        .route("/api/calibration", get(handlers::calibration_status))
        .route("/api/calibration/start", post(handlers::start_calibration))
        .route("/api/calibration/confirm", post(handlers::confirm_calibration))
        .route("/api/calibration/fit", post(handlers::fit_calibration))
        .route("/api/calibration/pause", post(handlers::pause_calibration))
        .route("/api/calibration/resume", post(handlers::resume_calibration))
        // Pipeline diagnostics
        .route("/api/diagnostics", get(handlers::diagnostics))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Dashboard is served from elsewhere on the LAN
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run(
    addr: SocketAddr,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
