//! Delayed-action and inbox API endpoints.

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use beckon_core::{take_background_actions, DelayedActionRecord, ResolvedAction};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the actions router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/pending", get(get_pending_actions))
        .route("/inbox", get(drain_inbox))
        .route("/{id}", delete(cancel_action))
}

/// The delayed actions waiting for their due time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PendingActionsResponse {
    /// Pending records, in creation order.
    pub pending: Vec<DelayedActionRecord>,

    /// Number of pending records.
    #[schema(example = 1)]
    pub count: usize,
}

/// Response after cancelling a delayed action.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({ "cancelled": true }))]
pub struct CancelActionResponse {
    /// Whether a pending record was removed.
    #[schema(example = true)]
    pub cancelled: bool,
}

/// Actions delivered by background invocations, awaiting foreground pickup.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InboxResponse {
    /// The actions that were waiting; draining clears the inbox.
    pub actions: Vec<ResolvedAction>,

    /// Number of drained actions.
    #[schema(example = 2)]
    pub count: usize,
}

/// List the pending delayed actions.
#[utoipa::path(
    get,
    path = "/actions/pending",
    tag = "actions",
    operation_id = "getPendingActions",
    summary = "List delayed actions",
    responses(
        (status = 200, description = "Pending delayed actions", body = PendingActionsResponse)
    )
)]
pub async fn get_pending_actions(
    State(state): State<SharedState>,
) -> Json<PendingActionsResponse> {
    let state_guard = state.read().await;
    let pending = state_guard.engine.pending_delayed().to_vec();
    let count = pending.len();

    Json(PendingActionsResponse { pending, count })
}

/// Cancel a pending delayed action by id.
#[utoipa::path(
    delete,
    path = "/actions/{id}",
    tag = "actions",
    operation_id = "cancelAction",
    summary = "Cancel a delayed action",
    params(
        ("id" = Uuid, Path, description = "Id of the resolved action to cancel")
    ),
    responses(
        (status = 200, description = "Cancellation outcome", body = CancelActionResponse),
        (status = 404, description = "No pending record with that id")
    )
)]
pub async fn cancel_action(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelActionResponse>> {
    let mut state_guard = state.write().await;
    let cancelled = state_guard.engine.cancel_action(id)?;
    if !cancelled {
        return Err(ApiError::NotFound {
            error_code: "action_not_found".to_string(),
            message: format!("No pending delayed action with id {id}"),
        });
    }
    Ok(Json(CancelActionResponse { cancelled }))
}

/// Drain the background delivery inbox.
///
/// Background invocations cannot surface actions in-process, so they queue
/// them durably; the foreground app calls this on session start to pick them
/// up. Draining clears the new-actions flag.
#[utoipa::path(
    get,
    path = "/actions/inbox",
    tag = "actions",
    operation_id = "drainInbox",
    summary = "Pick up background-delivered actions",
    responses(
        (status = 200, description = "Drained actions", body = InboxResponse)
    )
)]
pub async fn drain_inbox(State(state): State<SharedState>) -> ApiResult<Json<InboxResponse>> {
    let state_guard = state.read().await;
    let actions = take_background_actions(&state_guard.storage)?;
    let count = actions.len();

    Ok(Json(InboxResponse { actions, count }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_response_serialization() {
        let response = CancelActionResponse { cancelled: true };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"cancelled\":true"));
    }

    #[test]
    fn test_empty_inbox_serialization() {
        let response = InboxResponse {
            actions: Vec::new(),
            count: 0,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"count\":0"));
    }
}
