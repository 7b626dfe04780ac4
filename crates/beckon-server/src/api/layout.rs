//! Layout management API endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beckon_core::LayoutValidity;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the layout router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_layout))
        .route("/refresh", post(refresh_layout))
        .route("/invalidate", post(invalidate_layout))
}

/// Summary of the installed layout snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "version": 12,
    "validity": "valid",
    "rules": 7
}))]
pub struct LayoutResponse {
    /// Version of the installed snapshot, absent in the no-layout state.
    #[schema(example = 12)]
    pub version: Option<u64>,

    /// Freshness of the snapshot.
    pub validity: LayoutValidity,

    /// Number of rules in the snapshot.
    #[schema(example = 7)]
    pub rules: Option<usize>,
}

/// Response after a forced layout refresh.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({ "version": 13 }))]
pub struct RefreshLayoutResponse {
    /// Version of the snapshot that was installed.
    #[schema(example = 13)]
    pub version: u64,
}

/// Response after marking the layout stale.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({ "validity": "stale" }))]
pub struct InvalidateLayoutResponse {
    /// Freshness after the invalidation.
    pub validity: LayoutValidity,
}

/// Describe the installed layout snapshot.
#[utoipa::path(
    get,
    path = "/layout",
    tag = "layout",
    operation_id = "getLayout",
    summary = "Describe the installed layout",
    responses(
        (status = 200, description = "Layout summary", body = LayoutResponse)
    )
)]
pub async fn get_layout(State(state): State<SharedState>) -> Json<LayoutResponse> {
    let state_guard = state.read().await;
    let engine = &state_guard.engine;

    Json(LayoutResponse {
        version: engine.layout_version(),
        validity: engine.layout_validity(),
        rules: engine.layout_rule_count(),
    })
}

/// Force a layout fetch outside the cycle cadence.
#[utoipa::path(
    post,
    path = "/layout/refresh",
    tag = "layout",
    operation_id = "refreshLayout",
    summary = "Fetch the layout now",
    description = "Fetches the layout from the configured source and installs \
        it. On failure the previous snapshot is retained and the error is \
        returned.",
    responses(
        (status = 200, description = "Layout refreshed", body = RefreshLayoutResponse),
        (status = 424, description = "No layout source configured"),
        (status = 503, description = "Layout backend unreachable")
    )
)]
pub async fn refresh_layout(
    State(state): State<SharedState>,
) -> ApiResult<Json<RefreshLayoutResponse>> {
    let mut state_guard = state.write().await;
    let version = state_guard.engine.refresh_layout().await?;
    Ok(Json(RefreshLayoutResponse { version }))
}

/// Mark the layout stale (the backend's beacon-signature side channel).
#[utoipa::path(
    post,
    path = "/layout/invalidate",
    tag = "layout",
    operation_id = "invalidateLayout",
    summary = "Mark the layout stale",
    description = "The snapshot stays usable, but the next engine cycle \
        refreshes it.",
    responses(
        (status = 200, description = "Layout marked stale", body = InvalidateLayoutResponse)
    )
)]
pub async fn invalidate_layout(
    State(state): State<SharedState>,
) -> Json<InvalidateLayoutResponse> {
    let mut state_guard = state.write().await;
    state_guard.engine.invalidate_layout();
    Json(InvalidateLayoutResponse {
        validity: state_guard.engine.layout_validity(),
    })
}
