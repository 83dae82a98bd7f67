//! HTTP request handlers
//!
//! Thin adapters: decode the request, forward it to the scoring processor
//! through the [`EngineHandle`](crate::scoring::EngineHandle), encode the reply.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use ironsight_common::events::{
    CalibrationModel, CalibrationStatus, Mode, SessionStats, SessionSummary, ShotRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::server::AppContext;
use crate::config::NodeConfig;
use crate::error::Error;
use crate::localization::ChannelPosition;
use crate::scoring::{SessionDetail, StateSnapshot};
use crate::state::DiagnosticsSnapshot;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    mode: Mode,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous: Option<Mode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    arrows_per_end: Option<u32>,
    num_ends: Option<u32>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_list_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    complete_only: bool,
}

fn default_list_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

/// A point on the target face, sensor-plane units
#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    x: f64,
    y: f64,
}

#[derive(Debug, Serialize)]
pub struct ShotListResponse {
    shots: Vec<ShotRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RingsRequest {
    ring_radii: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct RingsResponse {
    ring_radii: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    ring_radii: Vec<f64>,
    ring_labels: Vec<&'static str>,
    refractory_ms: u64,
    units_to_cm: f64,
    sensor_radius: f64,
    channels: Vec<ChannelPosition>,
    nodes: Vec<NodeConfig>,
    correlation_mode: &'static str,
    wave_speed: f64,
}

type HandlerError = (StatusCode, Json<StatusResponse>);
type HandlerResult<T> = Result<Json<T>, HandlerError>;

/// Map engine errors onto HTTP status codes
fn error_response(e: Error) -> HandlerError {
    let status = match &e {
        Error::BadRequest(_) | Error::Packet(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidState(_) | Error::Calibration(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "ironsight_engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Mode
// ============================================================================

/// GET /api/mode
pub async fn get_mode(State(ctx): State<AppContext>) -> HandlerResult<ModeResponse> {
    let mode = ctx.handle.mode().await.map_err(error_response)?;
    Ok(Json(ModeResponse {
        mode,
        previous: None,
    }))
}

/// POST /api/mode
pub async fn set_mode(
    State(ctx): State<AppContext>,
    Json(req): Json<ModeRequest>,
) -> HandlerResult<ModeResponse> {
    let previous = ctx.handle.set_mode(req.mode).await.map_err(error_response)?;
    Ok(Json(ModeResponse {
        mode: req.mode,
        previous: Some(previous),
    }))
}

// ============================================================================
// Sessions
// ============================================================================

/// POST /api/session/start
///
/// Missing fields fall back to the configured session defaults. An
/// active session is ended first.
pub async fn start_session(
    State(ctx): State<AppContext>,
    body: Option<Json<StartSessionRequest>>,
) -> HandlerResult<SessionSummary> {
    let Json(req) = body.unwrap_or_default();
    let summary = ctx
        .handle
        .start_session(req.arrows_per_end, req.num_ends, req.notes)
        .await
        .map_err(error_response)?;
    info!("Session {} started via API", summary.session_id);
    Ok(Json(summary))
}

/// POST /api/session/end
pub async fn end_session(State(ctx): State<AppContext>) -> HandlerResult<SessionSummary> {
    ctx.handle
        .end_session()
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /api/session (null when no session is active)
pub async fn current_session(
    State(ctx): State<AppContext>,
) -> HandlerResult<Option<SessionSummary>> {
    ctx.handle
        .current_session()
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /api/sessions
pub async fn list_sessions(
    State(ctx): State<AppContext>,
    Query(query): Query<ListSessionsQuery>,
) -> HandlerResult<SessionListResponse> {
    let sessions = ctx
        .handle
        .list_sessions(query.limit, query.offset, query.complete_only)
        .await
        .map_err(error_response)?;
    Ok(Json(SessionListResponse { sessions }))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> HandlerResult<SessionDetail> {
    ctx.handle
        .session(id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// DELETE /api/sessions/:id
pub async fn delete_session(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> HandlerResult<StatusResponse> {
    ctx.handle.delete_session(id).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

/// GET /api/sessions/:id/stats
pub async fn session_stats(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> HandlerResult<SessionStats> {
    ctx.handle
        .session_stats(id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// State and shots
// ============================================================================

/// GET /api/state
pub async fn get_state(State(ctx): State<AppContext>) -> HandlerResult<StateSnapshot> {
    ctx.handle
        .snapshot()
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /api/shots
pub async fn list_shots(State(ctx): State<AppContext>) -> HandlerResult<ShotListResponse> {
    let shots = ctx.handle.shots().await.map_err(error_response)?;
    Ok(Json(ShotListResponse { shots }))
}

/// POST /api/shots/:id/ground_truth
pub async fn annotate_shot(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<PositionRequest>,
) -> HandlerResult<ShotRecord> {
    ctx.handle
        .annotate_shot(id, req.x, req.y)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Configuration
// ============================================================================

/// GET /api/config
pub async fn get_config(State(ctx): State<AppContext>) -> HandlerResult<ConfigResponse> {
    // Ring radii can change at runtime; everything else is fixed at startup
    let ring_radii = ctx.handle.ring_radii().await.map_err(error_response)?;
    let config = &ctx.config;

    Ok(Json(ConfigResponse {
        ring_radii,
        ring_labels: vec!["X", "10", "9", "8", "7", "6", "5", "4", "3", "2", "1"],
        refractory_ms: config.scoring.refractory_ms,
        units_to_cm: config.scoring.units_to_cm,
        sensor_radius: config.geometry.sensor_radius,
        channels: ctx.channels.as_ref().clone(),
        nodes: config.nodes.clone(),
        correlation_mode: if config.is_multi_node() {
            "multi-node"
        } else {
            "single-node"
        },
        wave_speed: config.localization.wave_speed,
    }))
}

/// POST /api/config/rings
pub async fn set_rings(
    State(ctx): State<AppContext>,
    Json(req): Json<RingsRequest>,
) -> HandlerResult<RingsResponse> {
    let ring_radii = ctx
        .handle
        .set_ring_radii(req.ring_radii)
        .await
        .map_err(error_response)?;
    Ok(Json(RingsResponse { ring_radii }))
}

// ============================================================================
// Calibration
// ============================================================================

/// GET /api/calibration
pub async fn calibration_status(
    State(ctx): State<AppContext>,
) -> HandlerResult<CalibrationStatus> {
    ctx.handle
        .calibration_status()
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/calibration/start
pub async fn start_calibration(
    State(ctx): State<AppContext>,
) -> HandlerResult<CalibrationStatus> {
    ctx.handle
        .start_calibration()
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/calibration/confirm
pub async fn confirm_calibration(
    State(ctx): State<AppContext>,
    Json(req): Json<PositionRequest>,
) -> HandlerResult<CalibrationStatus> {
    ctx.handle
        .confirm_calibration(req.x, req.y)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/calibration/fit
pub async fn fit_calibration(
    State(ctx): State<AppContext>,
) -> HandlerResult<CalibrationModel> {
    let model = ctx.handle.fit_calibration().await.map_err(error_response)?;
    Ok(Json(CalibrationModel::clone(&model)))
}

/// POST /api/calibration/pause
pub async fn pause_calibration(
    State(ctx): State<AppContext>,
) -> HandlerResult<CalibrationStatus> {
    ctx.handle
        .pause_calibration()
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/calibration/resume
pub async fn resume_calibration(
    State(ctx): State<AppContext>,
) -> HandlerResult<CalibrationStatus> {
    ctx.handle
        .resume_calibration()
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Diagnostics
// ============================================================================

/// GET /api/diagnostics
pub async fn diagnostics(State(ctx): State<AppContext>) -> Json<DiagnosticsSnapshot> {
    Json(ctx.state.counters.snapshot())
}
