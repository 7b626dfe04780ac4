//! Health check and engine status API endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beckon_core::{EnginePhase, LayoutValidity};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "layout_validity": "valid"
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Freshness of the installed layout snapshot.
    pub layout_validity: LayoutValidity,
}

/// Engine status response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "phase": "finished",
    "tracked_beacons": 4,
    "pending_delayed": 1,
    "layout_version": 12,
    "layout_validity": "valid",
    "history_entries": 132
}))]
pub struct StatusResponse {
    /// Phase of the current (or last) engine cycle.
    pub phase: EnginePhase,

    /// Beacon identities with tracked presence state.
    #[schema(example = 4)]
    pub tracked_beacons: usize,

    /// Delayed actions waiting for their due time.
    #[schema(example = 1)]
    pub pending_delayed: usize,

    /// Version of the installed layout snapshot.
    #[schema(example = 12)]
    pub layout_version: Option<u64>,

    /// Freshness of the installed layout snapshot.
    pub layout_validity: LayoutValidity,

    /// Retained history entries.
    #[schema(example = 132)]
    pub history_entries: usize,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns basic service status information. Use this endpoint \
        for load balancer health checks and monitoring.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let state_guard = state.read().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        layout_validity: state_guard.engine.layout_validity(),
    })
}

/// Engine status endpoint.
///
/// Reports the engine phase, presence tracking, pending delayed work, and
/// layout freshness in one call.
#[utoipa::path(
    get,
    path = "/status",
    tag = "system",
    operation_id = "engineStatus",
    summary = "Inspect the engine",
    description = "Returns the engine's cycle phase, the number of beacons \
        with tracked presence state, pending delayed actions, and layout \
        freshness.",
    responses(
        (status = 200, description = "Engine status", body = StatusResponse)
    )
)]
pub async fn engine_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let state_guard = state.read().await;
    let engine = &state_guard.engine;

    Json(StatusResponse {
        phase: engine.phase(),
        tracked_beacons: engine.tracked_beacons(),
        pending_delayed: engine.pending_delayed().len(),
        layout_version: engine.layout_version(),
        layout_validity: engine.layout_validity(),
        history_entries: engine.history().len(),
    })
}
