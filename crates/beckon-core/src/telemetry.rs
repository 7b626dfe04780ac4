//! Telemetry upload: shipping undelivered history entries to the backend.
//!
//! Uploads are batched and best-effort. Entries are marked delivered only
//! after a successful response, so a failed or interrupted upload simply
//! retries the same batch on a later cycle.

use tracing::{debug, info};

use crate::error::{BeckonError, Result};
use crate::history::{HistoryEntry, HistoryStore};

/// Uploads undelivered history entries in batches.
pub struct TelemetryUploader {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl TelemetryUploader {
    /// Create an uploader; `None` disables uploads entirely.
    #[must_use]
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Whether an endpoint is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Upload every undelivered entry as one JSON batch, marking entries
    /// delivered on success. Returns how many entries were uploaded.
    ///
    /// # Errors
    ///
    /// [`BeckonError::Network`] when the POST fails; nothing is marked in
    /// that case and the batch is retried on the next cycle.
    pub async fn upload(&self, history: &mut HistoryStore) -> Result<usize> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(0);
        };

        let batch: Vec<HistoryEntry> = history.undelivered().into_iter().cloned().collect();
        if batch.is_empty() {
            debug!("no undelivered history entries to upload");
            return Ok(0);
        }

        self.client
            .post(endpoint)
            .json(&batch)
            .send()
            .await
            .map_err(|e| BeckonError::Network(format!("telemetry upload: {e}")))?
            .error_for_status()
            .map_err(|e| BeckonError::Network(format!("telemetry upload: {e}")))?;

        let ids: Vec<uuid::Uuid> = batch.iter().map(|e| e.id).collect();
        history.mark_delivered(&ids)?;
        info!(uploaded = ids.len(), "telemetry batch uploaded");
        Ok(ids.len())
    }
}
