//! History inspection API endpoints.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use beckon_core::HistoryEntry;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the history router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_history))
}

/// Query parameters for the history endpoint.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Month to retrieve history for in YYYY-MM format.
    /// Defaults to the current month if not specified.
    #[param(example = "2025-06")]
    pub month: Option<String>,
}

/// History entries for one month.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryResponse {
    /// Month in YYYY-MM format.
    #[schema(example = "2025-06")]
    pub month: String,

    /// Entries recorded in the month, oldest first.
    pub entries: Vec<HistoryEntry>,

    /// Number of entries in the month.
    #[schema(example = 42)]
    pub total: usize,

    /// Entries still awaiting telemetry upload, across all months.
    #[schema(example = 3)]
    pub undelivered: usize,
}

/// Retrieve history entries for a month.
#[utoipa::path(
    get,
    path = "/history",
    tag = "history",
    operation_id = "getHistory",
    summary = "Inspect event/action history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "History entries", body = HistoryResponse),
        (status = 400, description = "Invalid month format")
    )
)]
pub async fn get_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let (year, month) = match &query.month {
        Some(raw) => parse_month(raw)?,
        None => {
            let now = Utc::now();
            (now.year(), now.month())
        }
    };

    let state_guard = state.read().await;
    let history = state_guard.engine.history();
    let entries: Vec<HistoryEntry> = history
        .month_entries(year, month)
        .into_iter()
        .cloned()
        .collect();
    let total = entries.len();

    Ok(Json(HistoryResponse {
        month: format!("{year}-{month:02}"),
        entries,
        total,
        undelivered: history.undelivered().len(),
    }))
}

/// Parse a `YYYY-MM` month string.
fn parse_month(raw: &str) -> Result<(i32, u32), ApiError> {
    let invalid = || ApiError::BadRequest {
        error_code: "invalid_month_format".to_string(),
        message: format!("Invalid month format: '{raw}'. Expected 'YYYY-MM' (e.g., '2025-06')."),
    };

    let (year_str, month_str) = raw.split_once('-').ok_or_else(invalid)?;
    let year: i32 = year_str.parse().map_err(|_| invalid())?;
    let month: u32 = month_str.parse().map_err(|_| invalid())?;
    if year_str.len() != 4 || month_str.len() != 2 || !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok((year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_month_valid() {
        assert_eq!(parse_month("2025-06").unwrap(), (2025, 6));
        assert_eq!(parse_month("1999-12").unwrap(), (1999, 12));
    }

    #[test]
    fn test_parse_month_invalid() {
        assert!(parse_month("2025").is_err());
        assert!(parse_month("2025-13").is_err());
        assert!(parse_month("2025-0").is_err());
        assert!(parse_month("25-06").is_err());
        assert!(parse_month("junk").is_err());
    }

    #[test]
    fn test_history_response_serialization() {
        let response = HistoryResponse {
            month: "2025-06".to_string(),
            entries: Vec::new(),
            total: 0,
            undelivered: 0,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"month\":\"2025-06\""));
    }
}
