//! Delayed action scheduling: durable deferral of resolved actions.
//!
//! There is no timer thread. The host wakes the engine (foreground tick or
//! background trigger) and each wake drains whatever has come due, so
//! execution granularity equals the host's wake interval. Every schedule is
//! persisted before it is acknowledged, and the executed mark is written to
//! history before the sink side effect, so a process kill at any point leaves
//! a state the next wake resumes correctly: at most one execution per action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::delivery::ActionSink;
use crate::error::Result;
use crate::history::HistoryStore;
use crate::resolver::ResolvedAction;
use crate::storage::Storage;
use crate::types::BeaconId;

/// The persisted form of a deferred action.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DelayedActionRecord {
    /// Creation-order counter; the tie-break for equal due times.
    pub seq: u64,

    /// When the record was scheduled.
    pub scheduled_at: DateTime<Utc>,

    /// The deferred action itself.
    pub action: ResolvedAction,
}

/// Holds actions whose execution is deferred to a future wall-clock time.
pub struct DelayedActionScheduler {
    storage: Storage,
    pending: Vec<DelayedActionRecord>,
    next_seq: u64,
}

impl DelayedActionScheduler {
    /// Open the scheduler, loading the pending set persisted by earlier
    /// invocations.
    ///
    /// # Errors
    ///
    /// Returns an error when the pending file exists but cannot be read;
    /// this is the unrecoverable-at-startup case.
    pub fn open(storage: Storage) -> Result<Self> {
        let pending = storage.load_delayed()?;
        let next_seq = pending.iter().map(|r| r.seq + 1).max().unwrap_or(0);
        Ok(Self {
            storage,
            pending,
            next_seq,
        })
    }

    /// Schedule an action for future execution. The record is persisted
    /// before this method returns.
    ///
    /// # Errors
    ///
    /// A persistence failure is returned to the caller, but the record stays
    /// queued in memory so the current process still executes it (degraded
    /// best-effort mode).
    pub fn schedule(&mut self, action: ResolvedAction, now: DateTime<Utc>) -> Result<()> {
        let record = DelayedActionRecord {
            seq: self.next_seq,
            scheduled_at: now,
            action,
        };
        self.next_seq += 1;
        debug!(
            action = %record.action.id,
            rule = %record.action.rule_id,
            due_at = %record.action.due_at,
            "scheduled delayed action"
        );
        self.pending.push(record);
        self.storage.save_delayed(&self.pending)
    }

    /// Cancel a pending record by action id. Returns `true` if a record was
    /// removed.
    pub fn cancel(&mut self, action_id: Uuid) -> Result<bool> {
        let before = self.pending.len();
        self.pending.retain(|r| r.action.id != action_id);
        if self.pending.len() == before {
            return Ok(false);
        }
        self.storage.save_delayed(&self.pending)?;
        Ok(true)
    }

    /// Execute every record due at `now`, in due-time order (creation order
    /// on ties). Returns the actions that ran through the sink this call.
    ///
    /// Per record the sequence is: history mark, pending-set persist, sink
    /// delivery. A record already marked in history (a previous drain was
    /// interrupted mid-batch) is removed without re-delivery.
    pub fn drain_due(
        &mut self,
        now: DateTime<Utc>,
        history: &mut HistoryStore,
        sink: &dyn ActionSink,
    ) -> Vec<ResolvedAction> {
        let mut due: Vec<DelayedActionRecord> = self
            .pending
            .iter()
            .filter(|r| r.action.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.action.due_at, r.seq));

        let mut executed = Vec::new();
        for record in due {
            let action = record.action;

            if history.has_action(action.id) {
                debug!(action = %action.id, "skipping re-execution of marked action");
                self.remove(action.id);
                continue;
            }

            // The executed mark must land before the side effect; if it
            // cannot, leave the record pending for the next wake.
            if let Err(e) = history.record_action(&action) {
                warn!(action = %action.id, error = %e, "could not mark delayed action; will retry");
                continue;
            }
            self.remove(action.id);

            if let Err(e) = sink.deliver(&action) {
                warn!(action = %action.id, error = %e, "action sink rejected delivery");
            }
            executed.push(action);
        }
        executed
    }

    /// Whether an equivalent action for (rule, beacon, layout version) is
    /// still waiting in the pending set.
    #[must_use]
    pub fn has_pending_for(&self, rule_id: &str, beacon: &BeaconId, layout_version: u64) -> bool {
        self.pending.iter().any(|r| {
            r.action.rule_id == rule_id
                && r.action.layout_version == layout_version
                && &r.action.beacon == beacon
        })
    }

    /// The pending records, in creation order.
    #[must_use]
    pub fn pending(&self) -> &[DelayedActionRecord] {
        &self.pending
    }

    fn remove(&mut self, action_id: Uuid) {
        self.pending.retain(|r| r.action.id != action_id);
        if let Err(e) = self.storage.save_delayed(&self.pending) {
            // The history mark already protects against re-execution, so a
            // failed shrink only costs a redundant skip on the next wake.
            warn!(action = %action_id, error = %e, "failed to persist pending set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ActionSink;
    use crate::error::BeckonError;
    use crate::layout::ActionPayload;
    use crate::types::EventKind;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    /// Sink that records everything it is handed.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl ActionSink for RecordingSink {
        fn deliver(&self, action: &ResolvedAction) -> Result<()> {
            if self.fail {
                return Err(BeckonError::Persistence("sink unavailable".into()));
            }
            self.delivered.lock().unwrap().push(action.id);
            Ok(())
        }
    }

    fn beacon() -> BeaconId {
        BeaconId::new(
            Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
            1001,
            7,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn action(rule_id: &str, due_at: DateTime<Utc>) -> ResolvedAction {
        ResolvedAction {
            id: Uuid::new_v4(),
            rule_id: rule_id.to_string(),
            layout_version: 1,
            beacon: beacon(),
            event_kind: EventKind::Enter,
            payload: ActionPayload {
                subject: Some("deferred".into()),
                ..Default::default()
            },
            due_at,
            created_at: now(),
        }
    }

    fn stores(dir: &tempfile::TempDir) -> (DelayedActionScheduler, HistoryStore) {
        let storage = Storage::new(dir.path().to_path_buf());
        (
            DelayedActionScheduler::open(storage.clone()).unwrap(),
            HistoryStore::open(storage).unwrap(),
        )
    }

    #[test]
    fn test_schedule_persists_before_return() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, _) = stores(&dir);

        scheduler
            .schedule(action("r1", now() + Duration::minutes(1)), now())
            .unwrap();

        // A fresh open from the same directory sees the record.
        let reopened =
            DelayedActionScheduler::open(Storage::new(dir.path().to_path_buf())).unwrap();
        assert_eq!(reopened.pending().len(), 1);
        assert!(reopened.has_pending_for("r1", &beacon(), 1));
    }

    #[test]
    fn test_drain_due_executes_in_due_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, mut history) = stores(&dir);
        let sink = RecordingSink::default();

        let late = action("late", now() - Duration::seconds(10));
        let early = action("early", now() - Duration::seconds(30));
        let future = action("future", now() + Duration::minutes(5));
        scheduler.schedule(late.clone(), now()).unwrap();
        scheduler.schedule(early.clone(), now()).unwrap();
        scheduler.schedule(future, now()).unwrap();

        let executed = scheduler.drain_due(now(), &mut history, &sink);
        let ids: Vec<Uuid> = executed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert_eq!(scheduler.pending().len(), 1);
        assert_eq!(*sink.delivered.lock().unwrap(), vec![early.id, late.id]);
    }

    #[test]
    fn test_equal_due_times_break_by_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, mut history) = stores(&dir);
        let sink = RecordingSink::default();

        let due = now() - Duration::seconds(1);
        let first = action("first", due);
        let second = action("second", due);
        scheduler.schedule(first.clone(), now()).unwrap();
        scheduler.schedule(second.clone(), now()).unwrap();

        let executed = scheduler.drain_due(now(), &mut history, &sink);
        let rules: Vec<&str> = executed.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["first", "second"]);
    }

    #[test]
    fn test_drain_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, mut history) = stores(&dir);
        let sink = RecordingSink::default();

        scheduler
            .schedule(action("r1", now() - Duration::seconds(1)), now())
            .unwrap();

        let first = scheduler.drain_due(now(), &mut history, &sink);
        let second = scheduler.drain_due(now(), &mut history, &sink);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_restart_round_trip_executes_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let due = now() + Duration::minutes(1);

        {
            let mut scheduler = DelayedActionScheduler::open(storage.clone()).unwrap();
            scheduler.schedule(action("r1", due), now()).unwrap();
            // Process dies here; nothing executed.
        }

        let mut scheduler = DelayedActionScheduler::open(storage.clone()).unwrap();
        let mut history = HistoryStore::open(storage.clone()).unwrap();
        let sink = RecordingSink::default();

        // Before the due time nothing runs.
        assert!(scheduler.drain_due(now(), &mut history, &sink).is_empty());

        let executed = scheduler.drain_due(due, &mut history, &sink);
        assert_eq!(executed.len(), 1);
        assert!(scheduler.pending().is_empty());

        // A second restart re-drains and finds nothing.
        let mut scheduler = DelayedActionScheduler::open(storage.clone()).unwrap();
        let mut history = HistoryStore::open(storage).unwrap();
        assert!(scheduler.drain_due(due, &mut history, &sink).is_empty());
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_interrupted_drain_does_not_redeliver() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, mut history) = stores(&dir);
        let sink = RecordingSink::default();

        let a = action("r1", now() - Duration::seconds(1));
        scheduler.schedule(a.clone(), now()).unwrap();

        // Simulate a kill after the history mark but before the pending-set
        // shrink: the mark exists, the record is still pending.
        history.record_action(&a).unwrap();

        let executed = scheduler.drain_due(now(), &mut history, &sink);
        assert!(executed.is_empty());
        assert!(scheduler.pending().is_empty());
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sink_failure_still_counts_as_executed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, mut history) = stores(&dir);
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };

        scheduler
            .schedule(action("r1", now() - Duration::seconds(1)), now())
            .unwrap();

        let executed = scheduler.drain_due(now(), &mut history, &sink);
        // The mark landed, so the action is spent even though the sink
        // refused it; at-most-once wins over redelivery.
        assert_eq!(executed.len(), 1);
        assert!(scheduler.pending().is_empty());
        assert!(scheduler.drain_due(now(), &mut history, &RecordingSink::default()).is_empty());
    }

    #[test]
    fn test_cancel_removes_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, mut history) = stores(&dir);

        let a = action("r1", now() + Duration::minutes(1));
        scheduler.schedule(a.clone(), now()).unwrap();

        assert!(scheduler.cancel(a.id).unwrap());
        assert!(!scheduler.cancel(a.id).unwrap());
        assert!(scheduler.pending().is_empty());

        // Nothing to execute at the would-have-been due time.
        let sink = RecordingSink::default();
        let executed = scheduler.drain_due(now() + Duration::minutes(2), &mut history, &sink);
        assert!(executed.is_empty());
    }

    #[test]
    fn test_seq_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());

        {
            let mut scheduler = DelayedActionScheduler::open(storage.clone()).unwrap();
            scheduler
                .schedule(action("r1", now() + Duration::minutes(1)), now())
                .unwrap();
        }

        let mut scheduler = DelayedActionScheduler::open(storage).unwrap();
        scheduler
            .schedule(action("r2", now() + Duration::minutes(1)), now())
            .unwrap();

        let seqs: Vec<u64> = scheduler.pending().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }
}
