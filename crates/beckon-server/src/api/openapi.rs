//! OpenAPI specification generation for the beckon API.
//!
//! The specification is served at `/api/openapi.json` and rendered by the
//! bundled Swagger UI; descriptions are written for both human operators and
//! generated clients.

use axum::Json;
use utoipa::OpenApi;

// Import all the handler modules to reference their types
use super::actions::{CancelActionResponse, InboxResponse, PendingActionsResponse};
use super::error::ErrorResponse;
use super::health::{HealthResponse, StatusResponse};
use super::history::HistoryResponse;
use super::layout::{InvalidateLayoutResponse, LayoutResponse, RefreshLayoutResponse};
use super::observations::{ObservationBatchRequest, ObservationRequest};
use beckon_core::{
    ActionPayload, BeaconEvent, BeaconId, BeaconObservation, CycleReport, DelayedActionRecord,
    EnginePhase, EventKind, HistoryEntry, HistoryKind, LayoutValidity, ResolvedAction, TriggerKind,
};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the beckon API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Main OpenAPI document structure for beckon.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beckon API",
        version = "0.1.0",
        description = r#"
# beckon API

beckon resolves Bluetooth Low-Energy beacon sightings into application
actions.

## Overview

This API hosts the foreground resolution engine and provides:

1. **Observation ingestion**: POST sighting batches; each batch runs one
   engine cycle (classify, resolve, execute due work)
2. **Layout management**: inspect, refresh, and invalidate the rule layout
3. **Delayed actions**: list and cancel actions waiting on their due time
4. **Background inbox**: pick up actions delivered by background wakes
5. **History**: inspect the durable event/action log

## Design Philosophy

- **Wake-driven time**: delayed actions execute on engine wakes (ingestion
  or the periodic tick), not on a dedicated timer thread
- **Graceful degradation**: a missing layout or an unreachable backend never
  fails a cycle; resolution simply produces nothing
- **Durable hand-offs**: background deliveries and delayed actions survive
  process kills
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beckon server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and engine status"
        ),
        (
            name = "observations",
            description = "Beacon sighting ingestion; drives engine cycles"
        ),
        (
            name = "layout",
            description = "The versioned ruleset mapping beacon events to actions"
        ),
        (
            name = "actions",
            description = "Delayed actions and the background delivery inbox"
        ),
        (
            name = "history",
            description = "Durable event/action history"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        super::health::engine_status,
        // Observation endpoints
        super::observations::ingest_observations,
        // Layout endpoints
        super::layout::get_layout,
        super::layout::refresh_layout,
        super::layout::invalidate_layout,
        // Action endpoints
        super::actions::get_pending_actions,
        super::actions::cancel_action,
        super::actions::drain_inbox,
        // History endpoints
        super::history::get_history,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            StatusResponse,
            // Observation types
            ObservationRequest,
            ObservationBatchRequest,
            // Layout types
            LayoutResponse,
            RefreshLayoutResponse,
            InvalidateLayoutResponse,
            LayoutValidity,
            // Action types
            PendingActionsResponse,
            CancelActionResponse,
            InboxResponse,
            // History types
            HistoryResponse,
            HistoryEntry,
            HistoryKind,
            // Core types
            BeaconId,
            BeaconObservation,
            BeaconEvent,
            EventKind,
            ActionPayload,
            ResolvedAction,
            DelayedActionRecord,
            CycleReport,
            EnginePhase,
            TriggerKind,
        )
    )
)]
pub struct ApiDoc;
