//! The engine façade: one invocation cycle over the whole pipeline.
//!
//! The engine owns every store (single-writer discipline) and is driven by a
//! single logical invocation at a time: a foreground session tick, or a
//! short-lived background wake that may be killed at any moment. Each cycle
//! walks the phases in order and always reaches `Finished`: a failed layout
//! fetch degrades to no-layout semantics, a storage failure degrades to
//! in-memory best effort, and only an unusable store at startup is a hard
//! error.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BeckonConfig;
use crate::delivery::ActionSink;
use crate::error::Result;
use crate::history::{HistoryStore, RetentionPolicy};
use crate::layout::{LayoutStore, LayoutValidity};
use crate::presence::PresenceTracker;
use crate::resolver::{self, ResolvedAction, SkipReason};
use crate::scheduler::{DelayedActionRecord, DelayedActionScheduler};
use crate::storage::Storage;
use crate::telemetry::TelemetryUploader;
use crate::types::{BeaconEvent, BeaconObservation};

/// What woke the engine for this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A foreground session (observation ingest or interactive call).
    Foreground,
    /// The periodic timer wake.
    Timer,
    /// A background wake triggered by an advertisement sighting.
    Advertisement,
}

/// The phase an invocation cycle is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// No cycle running.
    Idle,
    /// Refreshing the layout snapshot.
    Initializing,
    /// Classifying observations and resolving events.
    ResolvingEvents,
    /// Draining due delayed actions.
    ProcessingDelayed,
    /// Purging history and uploading telemetry.
    FlushingHistory,
    /// The cycle completed; the host may release its lease.
    Finished,
}

/// Typed outbound events collaborators subscribe to.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An observation classified into an enter/exit event.
    EventResolved(BeaconEvent),
    /// A rule produced an action (delivered now or scheduled).
    ActionResolved(ResolvedAction),
    /// The layout's freshness changed.
    LayoutValidityChanged(LayoutValidity),
    /// A rule matched but could not be resolved; non-fatal.
    ResolveFailed {
        /// The rule that failed.
        rule_id: String,
        /// Why resolution failed.
        reason: String,
    },
    /// The cycle reached `Finished`.
    CycleFinished(CycleReport),
}

/// Summary of one completed invocation cycle.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CycleReport {
    /// What woke the engine.
    pub trigger: TriggerKind,

    /// Observations that classified into enter/exit events.
    pub events: usize,

    /// Actions delivered immediately through the sink.
    pub delivered: usize,

    /// Actions handed to the delayed scheduler.
    pub scheduled: usize,

    /// Delayed actions that came due and executed this cycle.
    pub delayed_executed: usize,

    /// Drain rounds used.
    pub rounds: u32,

    /// History entries purged.
    pub purged: usize,

    /// History entries uploaded to telemetry.
    pub uploaded: usize,

    /// Layout version the cycle resolved under, if any.
    pub layout_version: Option<u64>,
}

/// Orchestrates presence tracking, layout, resolution, scheduling, and
/// history for one engine instance.
pub struct Engine {
    tracker: PresenceTracker,
    layout: LayoutStore,
    history: HistoryStore,
    scheduler: DelayedActionScheduler,
    uploader: TelemetryUploader,
    sink: Arc<dyn ActionSink>,
    retention: RetentionPolicy,
    max_drain_rounds: u32,
    phase: EnginePhase,
    events_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Build an engine over the given storage and sink.
    ///
    /// # Errors
    ///
    /// Returns an error when a store cannot be opened, the one failure mode
    /// surfaced to the host as hard per the startup contract.
    pub fn open(
        config: &BeckonConfig,
        storage: Storage,
        sink: Arc<dyn ActionSink>,
    ) -> Result<Self> {
        let layout = LayoutStore::open(storage.clone(), &config.layout, config.timezone)?;
        let history = HistoryStore::open(storage.clone())?;
        let scheduler = DelayedActionScheduler::open(storage)?;
        let (events_tx, _) = broadcast::channel(64);

        Ok(Self {
            tracker: PresenceTracker::new(config.presence.policy()),
            layout,
            history,
            scheduler,
            uploader: TelemetryUploader::new(config.telemetry.endpoint.clone()),
            sink,
            retention: RetentionPolicy::days(config.history.retention_days),
            max_drain_rounds: config.engine.max_drain_rounds,
            phase: EnginePhase::Idle,
            events_tx,
        })
    }

    /// Subscribe to the engine's outbound events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    /// The phase the current (or last) cycle is in.
    #[must_use]
    pub const fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Version of the installed layout snapshot, if any.
    #[must_use]
    pub fn layout_version(&self) -> Option<u64> {
        self.layout.version()
    }

    /// Freshness of the installed layout snapshot.
    #[must_use]
    pub fn layout_validity(&self) -> LayoutValidity {
        self.layout.validity(Utc::now())
    }

    /// Number of rules in the installed layout snapshot, if any.
    #[must_use]
    pub fn layout_rule_count(&self) -> Option<usize> {
        self.layout.current().map(|l| l.rules.len())
    }

    /// Number of beacon identities with tracked presence state.
    #[must_use]
    pub fn tracked_beacons(&self) -> usize {
        self.tracker.tracked()
    }

    /// The pending delayed-action records.
    #[must_use]
    pub fn pending_delayed(&self) -> &[DelayedActionRecord] {
        self.scheduler.pending()
    }

    /// Read access to the history store.
    #[must_use]
    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Cancel a pending delayed action. Returns `true` if a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error when the shrunken pending set cannot be persisted.
    pub fn cancel_action(&mut self, action_id: Uuid) -> Result<bool> {
        self.scheduler.cancel(action_id)
    }

    /// Mark the layout stale (the backend's side-channel signal); the next
    /// cycle refreshes it.
    pub fn invalidate_layout(&mut self) {
        self.layout.invalidate();
        let _ = self
            .events_tx
            .send(EngineEvent::LayoutValidityChanged(self.layout_validity()));
    }

    /// Force a layout fetch outside the cycle cadence. Returns the new
    /// version.
    ///
    /// # Errors
    ///
    /// Propagates fetch and parse failures; the previous snapshot is
    /// retained.
    pub async fn refresh_layout(&mut self) -> Result<u64> {
        let layout = self.layout.fetch().await?;
        let _ = self
            .events_tx
            .send(EngineEvent::LayoutValidityChanged(self.layout_validity()));
        Ok(layout.version)
    }

    /// Run one invocation cycle: refresh the layout, classify and resolve the
    /// given observations, drain due delayed actions, flush history, and
    /// report. Every failure past startup degrades in place, so the cycle
    /// always reaches `Finished` and the host always gets its completion
    /// signal.
    pub async fn run_cycle(
        &mut self,
        observations: &[BeaconObservation],
        trigger: TriggerKind,
    ) -> CycleReport {
        let mut report = CycleReport {
            trigger,
            events: 0,
            delivered: 0,
            scheduled: 0,
            delayed_executed: 0,
            rounds: 0,
            purged: 0,
            uploaded: 0,
            layout_version: None,
        };
        debug!(?trigger, observations = observations.len(), "cycle started");

        // ------------------------------------------------------------------
        // Initializing: make sure the freshest reachable layout is installed.
        // ------------------------------------------------------------------
        self.phase = EnginePhase::Initializing;
        let validity_before = self.layout_validity();
        if let Err(e) = self.layout.ensure_fresh(Utc::now()).await {
            warn!(error = %e, "layout unavailable; resolving with no-layout semantics");
        }
        let validity_after = self.layout_validity();
        if validity_after != validity_before {
            let _ = self
                .events_tx
                .send(EngineEvent::LayoutValidityChanged(validity_after));
        }

        // ------------------------------------------------------------------
        // ResolvingEvents: observations -> events -> actions.
        // ------------------------------------------------------------------
        self.phase = EnginePhase::ResolvingEvents;
        let snapshot = self.layout.current();
        report.layout_version = snapshot.as_ref().map(|l| l.version);

        for obs in observations {
            let event = self.tracker.classify(obs);
            if !event.kind.is_transition() {
                continue;
            }
            report.events += 1;

            if let Err(e) = self.history.record_event(&event) {
                warn!(error = %e, beacon = %event.beacon, "could not record event; continuing in memory");
            }
            let _ = self.events_tx.send(EngineEvent::EventResolved(event.clone()));

            let Some(layout) = snapshot.as_deref() else {
                continue;
            };

            let now = Utc::now();
            let resolution = resolver::resolve(&event, layout, &self.history, &self.scheduler, now);

            for skip in &resolution.skipped {
                if let SkipReason::Malformed(reason) = &skip.reason {
                    let _ = self.events_tx.send(EngineEvent::ResolveFailed {
                        rule_id: skip.rule_id.clone(),
                        reason: reason.clone(),
                    });
                }
            }

            for action in resolution.actions {
                if action.is_due(now) {
                    if let Err(e) = self.history.record_action(&action) {
                        warn!(error = %e, action = %action.id, "could not record action; continuing in memory");
                    }
                    if let Err(e) = self.sink.deliver(&action) {
                        warn!(error = %e, action = %action.id, "action sink rejected delivery");
                    }
                    report.delivered += 1;
                } else {
                    if let Err(e) = self.scheduler.schedule(action.clone(), now) {
                        warn!(error = %e, action = %action.id, "could not persist delayed action; kept in memory");
                    }
                    report.scheduled += 1;
                }
                let _ = self.events_tx.send(EngineEvent::ActionResolved(action));
            }
        }

        // ------------------------------------------------------------------
        // ProcessingDelayed: bounded polling until no due work remains.
        // ------------------------------------------------------------------
        self.phase = EnginePhase::ProcessingDelayed;
        while report.rounds < self.max_drain_rounds {
            report.rounds += 1;
            let executed =
                self.scheduler
                    .drain_due(Utc::now(), &mut self.history, self.sink.as_ref());
            if executed.is_empty() {
                break;
            }
            report.delayed_executed += executed.len();
        }

        // ------------------------------------------------------------------
        // FlushingHistory: retention purge, then a best-effort upload.
        // ------------------------------------------------------------------
        self.phase = EnginePhase::FlushingHistory;
        match self.history.purge(&self.retention, Utc::now()) {
            Ok(purged) => report.purged = purged,
            Err(e) => warn!(error = %e, "history purge failed"),
        }
        if self.uploader.is_configured() {
            match self.uploader.upload(&mut self.history).await {
                Ok(uploaded) => report.uploaded = uploaded,
                Err(e) => warn!(error = %e, "telemetry upload failed; will retry next cycle"),
            }
        }

        // ------------------------------------------------------------------
        // Finished: signal completion so the host can release its lease.
        // ------------------------------------------------------------------
        self.phase = EnginePhase::Finished;
        info!(
            ?trigger,
            events = report.events,
            delivered = report.delivered,
            scheduled = report.scheduled,
            delayed_executed = report.delayed_executed,
            "cycle finished"
        );
        let _ = self
            .events_tx
            .send(EngineEvent::CycleFinished(report.clone()));
        report
    }
}
