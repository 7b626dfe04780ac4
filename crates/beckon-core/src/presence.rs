//! Beacon presence tracking: classifying raw sightings into enter/exit events.
//!
//! The tracker keeps one [`PresenceState`] per beacon identity for the
//! lifetime of the process. State is deliberately not persisted: a restart
//! forgets recent sightings, and the durable history store provides the
//! cross-restart memory that keeps duplicate enter notifications away.
//!
//! Elapsed time is measured between observation timestamps, never against the
//! wall clock, so classification is a pure function of the observation stream.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::types::{BeaconEvent, BeaconId, BeaconObservation, EventKind};

/// Tuning knobs for enter/exit classification.
#[derive(Debug, Clone)]
pub struct PresencePolicy {
    /// Signal strength at or below which a beacon counts as out of range.
    pub out_of_range_dbm: i16,

    /// Minimum time a beacon must stay in a state before exit detection (and
    /// re-enter notification) fires.
    pub exit_timeout: Duration,

    /// When set, an exit additionally requires the exit timeout to have
    /// elapsed, so a single missed or weak advertisement cannot flap the
    /// state. On by default.
    pub burst_suppression: bool,

    /// Historical behavior compared the signal against the threshold with
    /// exact equality instead of `<=`. Off by default; kept for deployments
    /// that depend on the old classification.
    pub legacy_exact_threshold: bool,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            out_of_range_dbm: -95,
            exit_timeout: Duration::milliseconds(10_000),
            burst_suppression: true,
            legacy_exact_threshold: false,
        }
    }
}

/// Last known state for a single beacon identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceState {
    /// The last emitted transition for this beacon.
    pub kind: EventKind,
    /// When that transition was observed.
    pub since: DateTime<Utc>,
}

/// Converts a stream of raw observations into enter/exit semantic events.
///
/// Each beacon identity has at most one tracked state; updates are
/// last-write-wins keyed by structural identity equality.
#[derive(Debug)]
pub struct PresenceTracker {
    policy: PresencePolicy,
    states: HashMap<BeaconId, PresenceState>,
}

impl PresenceTracker {
    /// Create a tracker with the given policy.
    #[must_use]
    pub fn new(policy: PresencePolicy) -> Self {
        Self {
            policy,
            states: HashMap::new(),
        }
    }

    /// Classify a single observation, updating the tracked state when the
    /// result is a transition.
    ///
    /// The rules, in order:
    /// - an unseen identity enters;
    /// - an identity whose last state was exit re-enters;
    /// - an in-range identity whose enter is older than the exit timeout
    ///   re-enters (the cool-down rule);
    /// - an out-of-range identity that last entered exits; under burst
    ///   suppression only once the exit timeout has elapsed as well;
    /// - anything else is a routine re-sighting and classifies as
    ///   [`EventKind::None`].
    pub fn classify(&mut self, obs: &BeaconObservation) -> BeaconEvent {
        let kind = self.classify_kind(obs);
        if kind.is_transition() {
            self.states.insert(
                obs.beacon.clone(),
                PresenceState {
                    kind,
                    since: obs.observed_at,
                },
            );
        }
        BeaconEvent {
            beacon: obs.beacon.clone(),
            kind,
            occurred_at: obs.observed_at,
        }
    }

    fn classify_kind(&self, obs: &BeaconObservation) -> EventKind {
        let out_of_range = if self.policy.legacy_exact_threshold {
            obs.rssi_dbm == self.policy.out_of_range_dbm
        } else {
            obs.rssi_dbm <= self.policy.out_of_range_dbm
        };

        let Some(state) = self.states.get(&obs.beacon) else {
            return EventKind::Enter;
        };

        match state.kind {
            EventKind::Exit => EventKind::Enter,
            EventKind::Enter => {
                let cooled_down =
                    obs.observed_at.signed_duration_since(state.since) >= self.policy.exit_timeout;
                if !out_of_range && cooled_down {
                    EventKind::Enter
                } else if out_of_range && (!self.policy.burst_suppression || cooled_down) {
                    EventKind::Exit
                } else {
                    EventKind::None
                }
            }
            EventKind::None => {
                // Transitions are the only states ever stored; absorb the
                // inconsistency rather than propagate it.
                debug!(beacon = %obs.beacon, "ignoring observation with untracked presence state");
                EventKind::None
            }
        }
    }

    /// Last known state for a beacon, if it has been sighted this process.
    #[must_use]
    pub fn state(&self, beacon: &BeaconId) -> Option<&PresenceState> {
        self.states.get(beacon)
    }

    /// Number of beacon identities currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Drop all tracked state, as a process restart would.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
