//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `observations` - Beacon sighting ingestion (drives engine cycles)
//! - `layout` - Rule layout inspection, refresh, and invalidation
//! - `actions` - Delayed actions and the background delivery inbox
//! - `history` - Durable event/action history
//! - `health` - Service health and engine status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod actions;
pub mod error;
pub mod health;
pub mod history;
pub mod layout;
pub mod observations;
pub mod openapi;

// Re-export commonly used types
#[allow(unused_imports)]
pub use error::{ApiError, ApiResult, ErrorResponse};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                    - Health check
/// /api
/// ├── /status                - Engine status
/// ├── /observations          - Sighting ingestion (POST)
/// ├── /layout                - Layout summary, /refresh, /invalidate
/// ├── /actions/pending       - Delayed actions
/// ├── /actions/{id}          - Cancel a delayed action (DELETE)
/// ├── /actions/inbox         - Background delivery pickup
/// ├── /history               - Month history
/// └── /openapi.json          - OpenAPI specification
/// /swagger-ui                - Interactive documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                // Engine status at /api/status
                .route("/status", get(health::engine_status))
                // OpenAPI spec at /api/openapi.json
                .route("/openapi.json", get(openapi::get_openapi_spec))
                // Sighting ingestion
                .nest("/observations", observations::router())
                // Layout management
                .nest("/layout", layout::router())
                // Delayed actions and inbox
                .nest("/actions", actions::router())
                // History inspection
                .nest("/history", history::router()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::build_state_with;
    use axum_test::TestServer;
    use beckon_core::BeckonConfig;

    fn test_state() -> (tempfile::TempDir, SharedState) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BeckonConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        let state = build_state_with(config).unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, state) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: health::HealthResponse = response.json();
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_ingest_runs_cycle_without_layout() {
        let (_dir, state) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server
            .post("/api/observations")
            .json(&serde_json::json!({
                "observations": [{
                    "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
                    "major": 1001,
                    "minor": 7,
                    "rssi_dbm": -60
                }]
            }))
            .await;
        response.assert_status_ok();

        // The enter landed in history even with no layout installed.
        let history = server.get("/api/history").await;
        history.assert_status_ok();
    }

    #[tokio::test]
    async fn test_history_rejects_bad_month() {
        let (_dir, state) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server
            .get("/api/history")
            .add_query_param("month", "junk")
            .await;
        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_cancel_unknown_action_is_not_found() {
        let (_dir, state) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server
            .delete("/api/actions/00000000-0000-0000-0000-000000000000")
            .await;
        response.assert_status_not_found();
    }
}
