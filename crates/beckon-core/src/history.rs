//! Durable history of classified events and executed actions.
//!
//! The history is an append-only log sharded into month files. It serves
//! three readers: the resolver's send-once deduplication, the scheduler's
//! interrupted-drain idempotence check, and the telemetry uploader's
//! undelivered queue. The full working set is held in memory behind a single
//! writer; every mutation is persisted before it is acknowledged.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::Result;
use crate::resolver::ResolvedAction;
use crate::storage::Storage;
use crate::types::{BeaconEvent, BeaconId, EventKind};

/// Whether a history entry records a classified event or an executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// An enter/exit event emitted by the presence tracker.
    Event,
    /// An action delivered through the action sink.
    Action,
}

/// One record of the append-only history log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    /// Unique id of this entry.
    pub id: Uuid,

    /// Event or action.
    pub kind: HistoryKind,

    /// The beacon the event or action was triggered by.
    pub beacon: BeaconId,

    /// The event kind involved (for actions: the triggering event kind).
    pub event_kind: EventKind,

    /// Id of the rule that produced the action (actions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    /// Layout version the action was resolved under (actions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_version: Option<u64>,

    /// Id of the resolved action (actions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,

    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,

    /// Whether the entry has been uploaded to the telemetry backend.
    #[serde(default)]
    pub delivered: bool,
}

impl HistoryEntry {
    /// Year of the month shard this entry belongs to.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.recorded_at.year()
    }

    /// Month of the month shard this entry belongs to.
    #[must_use]
    pub fn month(&self) -> u32 {
        self.recorded_at.month()
    }
}

/// How far back history entries are retained.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Entries older than this are eligible for purging.
    pub horizon: Duration,
}

impl RetentionPolicy {
    /// Retention of `days` days.
    #[must_use]
    pub fn days(days: u64) -> Self {
        Self {
            horizon: Duration::days(i64::try_from(days).unwrap_or(30)),
        }
    }
}

/// Append-only store of delivered/undelivered events and actions.
pub struct HistoryStore {
    storage: Storage,
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    /// Open the store, loading all retained month shards.
    ///
    /// # Errors
    ///
    /// Returns an error when the history directory exists but cannot be read;
    /// this is the unrecoverable-at-startup case.
    pub fn open(storage: Storage) -> Result<Self> {
        let entries = storage.load_history()?;
        Ok(Self { storage, entries })
    }

    /// Record a classified enter/exit event.
    pub fn record_event(&mut self, event: &BeaconEvent) -> Result<Uuid> {
        self.append(HistoryEntry {
            id: Uuid::new_v4(),
            kind: HistoryKind::Event,
            beacon: event.beacon.clone(),
            event_kind: event.kind,
            rule_id: None,
            layout_version: None,
            action_id: None,
            recorded_at: event.occurred_at,
            delivered: false,
        })
    }

    /// Record an executed action. For delayed actions this write is the
    /// executed mark and happens before the sink side effect.
    pub fn record_action(&mut self, action: &ResolvedAction) -> Result<Uuid> {
        self.append(HistoryEntry {
            id: Uuid::new_v4(),
            kind: HistoryKind::Action,
            beacon: action.beacon.clone(),
            event_kind: action.event_kind,
            rule_id: Some(action.rule_id.clone()),
            layout_version: Some(action.layout_version),
            action_id: Some(action.id),
            recorded_at: Utc::now(),
            delivered: false,
        })
    }

    fn append(&mut self, entry: HistoryEntry) -> Result<Uuid> {
        let id = entry.id;
        self.storage.append_history(&entry)?;
        self.entries.push(entry);
        Ok(id)
    }

    /// Send-once query: has an action for this (rule, beacon, layout version)
    /// already been recorded?
    #[must_use]
    pub fn was_delivered(&self, rule_id: &str, beacon: &BeaconId, layout_version: u64) -> bool {
        self.entries.iter().any(|e| {
            e.kind == HistoryKind::Action
                && e.rule_id.as_deref() == Some(rule_id)
                && e.layout_version == Some(layout_version)
                && &e.beacon == beacon
        })
    }

    /// Idempotence query: has this specific resolved action already executed?
    #[must_use]
    pub fn has_action(&self, action_id: Uuid) -> bool {
        self.entries.iter().any(|e| e.action_id == Some(action_id))
    }

    /// Entries not yet uploaded to the telemetry backend.
    #[must_use]
    pub fn undelivered(&self) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| !e.delivered).collect()
    }

    /// Mark entries as uploaded. Returns how many flags changed.
    pub fn mark_delivered(&mut self, ids: &[Uuid]) -> Result<usize> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let mut touched_months = BTreeSet::new();
        let mut changed = 0;

        for entry in &mut self.entries {
            if wanted.contains(&entry.id) && !entry.delivered {
                entry.delivered = true;
                touched_months.insert((entry.year(), entry.month()));
                changed += 1;
            }
        }

        if changed > 0 {
            self.rewrite_months(&touched_months)?;
        }
        Ok(changed)
    }

    /// Purge entries older than the retention horizon. Entries still awaiting
    /// upload are never purged. Returns how many entries were removed.
    pub fn purge(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - policy.horizon;
        let mut touched_months = BTreeSet::new();

        let before = self.entries.len();
        self.entries.retain(|e| {
            let keep = e.recorded_at >= cutoff || !e.delivered;
            if !keep {
                touched_months.insert((e.year(), e.month()));
            }
            keep
        });
        let removed = before - self.entries.len();

        if removed > 0 {
            self.rewrite_months(&touched_months)?;
        }
        Ok(removed)
    }

    /// Entries recorded in the given month, oldest first.
    #[must_use]
    pub fn month_entries(&self, year: i32, month: u32) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.year() == year && e.month() == month)
            .collect()
    }

    /// Total number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rewrite_months(&self, months: &BTreeSet<(i32, u32)>) -> Result<()> {
        for &(year, month) in months {
            let shard: Vec<HistoryEntry> = self
                .entries
                .iter()
                .filter(|e| e.year() == year && e.month() == month)
                .cloned()
                .collect();
            self.storage.rewrite_history_month(year, month, &shard)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn beacon() -> BeaconId {
        BeaconId::new(
            Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
            1001,
            7,
        )
    }

    fn event(at: DateTime<Utc>) -> BeaconEvent {
        BeaconEvent {
            beacon: beacon(),
            kind: EventKind::Enter,
            occurred_at: at,
        }
    }

    fn action(rule_id: &str, version: u64) -> ResolvedAction {
        ResolvedAction {
            id: Uuid::new_v4(),
            rule_id: rule_id.to_string(),
            layout_version: version,
            beacon: beacon(),
            event_kind: EventKind::Enter,
            payload: crate::layout::ActionPayload {
                subject: Some("hi".into()),
                ..Default::default()
            },
            due_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> HistoryStore {
        HistoryStore::open(Storage::new(dir.path().to_path_buf())).unwrap()
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        store.record_event(&event(Utc::now())).unwrap();
        store.record_action(&action("rule-1", 3)).unwrap();
        assert_eq!(store.len(), 2);

        // A fresh open sees the same entries.
        let reopened = open_store(&dir);
        assert_eq!(reopened.len(), 2);
        assert!(reopened.was_delivered("rule-1", &beacon(), 3));
    }

    #[test]
    fn test_was_delivered_matches_full_triple() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        store.record_action(&action("rule-1", 3)).unwrap();

        assert!(store.was_delivered("rule-1", &beacon(), 3));
        assert!(!store.was_delivered("rule-2", &beacon(), 3));
        assert!(!store.was_delivered("rule-1", &beacon(), 4));

        let other = BeaconId::new(beacon().uuid, 1001, 8);
        assert!(!store.was_delivered("rule-1", &other, 3));
    }

    #[test]
    fn test_has_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let a = action("rule-1", 1);
        assert!(!store.has_action(a.id));
        store.record_action(&a).unwrap();
        assert!(store.has_action(a.id));
    }

    #[test]
    fn test_mark_delivered_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let id = store.record_event(&event(Utc::now())).unwrap();
        assert_eq!(store.undelivered().len(), 1);

        let changed = store.mark_delivered(&[id]).unwrap();
        assert_eq!(changed, 1);
        assert!(store.undelivered().is_empty());

        // Marking again changes nothing.
        assert_eq!(store.mark_delivered(&[id]).unwrap(), 0);

        let reopened = open_store(&dir);
        assert!(reopened.undelivered().is_empty());
    }

    #[test]
    fn test_purge_respects_pending_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let old = now - Duration::days(60);

        let uploaded = store.record_event(&event(old)).unwrap();
        store.record_event(&event(old)).unwrap();
        store.record_event(&event(now)).unwrap();
        store.mark_delivered(&[uploaded]).unwrap();

        let removed = store.purge(&RetentionPolicy::days(30), now).unwrap();
        assert_eq!(removed, 1);
        // The old-but-unuploaded entry and the recent entry survive.
        assert_eq!(store.len(), 2);

        let reopened = open_store(&dir);
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_month_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let jan = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap();
        store.record_event(&event(jan)).unwrap();
        store.record_event(&event(feb)).unwrap();

        assert_eq!(store.month_entries(2025, 1).len(), 1);
        assert_eq!(store.month_entries(2025, 2).len(), 1);
        assert!(store.month_entries(2025, 3).is_empty());
    }
}
