//! Observation ingestion API endpoints.
//!
//! The beacon observation source (a scanner process, a gateway, a test rig)
//! POSTs sighting batches here. Each batch drives one foreground engine
//! cycle, so ingestion is also what executes any delayed actions that have
//! come due.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use beckon_core::{BeaconId, BeaconObservation, CycleReport, TriggerKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the observations router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(ingest_observations))
}

/// One beacon sighting in an ingestion batch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 1001,
    "minor": 7,
    "rssi_dbm": -67
}))]
pub struct ObservationRequest {
    /// Region UUID of the sighted beacon.
    pub uuid: Uuid,

    /// Major value of the sighted beacon.
    #[schema(example = 1001)]
    pub major: u16,

    /// Minor value of the sighted beacon.
    #[schema(example = 7)]
    pub minor: u16,

    /// Received signal strength in dBm.
    #[schema(example = -67)]
    pub rssi_dbm: i16,

    /// Calibrated transmit power at 1 m, if known.
    pub measured_power: Option<i16>,

    /// Estimated distance in meters, if the source computed one.
    pub distance_m: Option<f64>,

    /// When the advertisement was received; defaults to the server's now.
    pub observed_at: Option<DateTime<Utc>>,
}

/// A batch of sightings from one scan tick.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ObservationBatchRequest {
    /// The sightings, in scan order.
    pub observations: Vec<ObservationRequest>,
}

/// Ingest a batch of beacon observations.
///
/// Runs one foreground engine cycle over the batch and returns its report.
#[utoipa::path(
    post,
    path = "/observations",
    tag = "observations",
    operation_id = "ingestObservations",
    summary = "Ingest a batch of beacon sightings",
    description = "Classifies each sighting into an enter/exit event, \
        resolves matching layout rules into actions, executes whatever is \
        due, and reports what the cycle did. Foreground deliveries surface \
        on the server's in-process action channel.",
    request_body = ObservationBatchRequest,
    responses(
        (status = 200, description = "Cycle completed", body = CycleReport)
    )
)]
pub async fn ingest_observations(
    State(state): State<SharedState>,
    Json(batch): Json<ObservationBatchRequest>,
) -> ApiResult<Json<CycleReport>> {
    let now = Utc::now();
    let observations: Vec<BeaconObservation> = batch
        .observations
        .into_iter()
        .map(|o| BeaconObservation {
            beacon: BeaconId::new(o.uuid, o.major, o.minor),
            rssi_dbm: o.rssi_dbm,
            measured_power: o.measured_power,
            distance_m: o.distance_m,
            observed_at: o.observed_at.unwrap_or(now),
        })
        .collect();

    let mut state_guard = state.write().await;
    let report = state_guard
        .engine
        .run_cycle(&observations, TriggerKind::Foreground)
        .await;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_request_deserialization() {
        let json = r#"{
            "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
            "major": 1001,
            "minor": 7,
            "rssi_dbm": -67
        }"#;
        let req: ObservationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.major, 1001);
        assert_eq!(req.rssi_dbm, -67);
        assert!(req.observed_at.is_none());
    }

    #[test]
    fn test_batch_deserialization() {
        let json = r#"{"observations": []}"#;
        let batch: ObservationBatchRequest = serde_json::from_str(json).unwrap();
        assert!(batch.observations.is_empty());
    }
}
