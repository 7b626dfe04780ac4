//! Action resolution: mapping a semantic beacon event against the current
//! layout into zero or more concrete actions.
//!
//! Resolution is a pure pass over the layout snapshot: matching rules produce
//! [`ResolvedAction`]s ordered by due time (ties in rule declaration order),
//! send-once rules are deduplicated against history and the pending delayed
//! set, and malformed rules are skipped and reported without ever aborting
//! their siblings.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::history::HistoryStore;
use crate::layout::{ActionPayload, Layout};
use crate::scheduler::DelayedActionScheduler;
use crate::types::{BeaconEvent, BeaconId, EventKind};

/// A concrete action produced by resolution, ready for delivery or deferral.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResolvedAction {
    /// Unique id; the sink's idempotence key.
    pub id: Uuid,

    /// The rule that produced this action.
    pub rule_id: String,

    /// Layout version the rule was resolved under.
    pub layout_version: u64,

    /// The beacon whose event triggered the rule.
    pub beacon: BeaconId,

    /// The triggering event kind.
    pub event_kind: EventKind,

    /// What to deliver.
    pub payload: ActionPayload,

    /// When the action should execute; equal to creation time for immediate
    /// actions.
    pub due_at: DateTime<Utc>,

    /// When resolution produced the action.
    pub created_at: DateTime<Utc>,
}

impl ResolvedAction {
    /// Whether the action is due for execution at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// Why a matching rule produced no action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A send-once rule already produced an action for this beacon under the
    /// current layout version (recorded or still pending).
    AlreadySent,
    /// The rule's validity window excludes the current time.
    OutsideValidity,
    /// The rule has no usable action payload.
    Malformed(String),
}

/// A rule that matched the event but was not instantiated.
#[derive(Debug, Clone)]
pub struct SkippedRule {
    /// Id of the skipped rule.
    pub rule_id: String,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// The outcome of one resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Actions to dispatch, ordered by due time then rule declaration order.
    pub actions: Vec<ResolvedAction>,
    /// Matching rules that produced nothing, with the reason.
    pub skipped: Vec<SkippedRule>,
}

/// Resolve one beacon event against a layout snapshot.
///
/// `history` answers the send-once query for already-executed actions;
/// `scheduler` extends it to actions still waiting in the delayed set, so a
/// re-fired event inside the delay window cannot schedule a duplicate.
#[must_use]
pub fn resolve(
    event: &BeaconEvent,
    layout: &Layout,
    history: &HistoryStore,
    scheduler: &DelayedActionScheduler,
    now: DateTime<Utc>,
) -> Resolution {
    let mut resolution = Resolution::default();

    // A no-transition event never resolves; the same arm absorbs any
    // inconsistent classification upstream.
    if !event.kind.is_transition() {
        return resolution;
    }

    for rule in &layout.rules {
        if !rule.pattern.matches(&event.beacon) || !rule.trigger.matches(event.kind) {
            continue;
        }

        if !rule.is_valid_at(now) {
            resolution.skipped.push(SkippedRule {
                rule_id: rule.id.clone(),
                reason: SkipReason::OutsideValidity,
            });
            continue;
        }

        if !rule.is_well_formed() {
            resolution.skipped.push(SkippedRule {
                rule_id: rule.id.clone(),
                reason: SkipReason::Malformed("rule has no usable action payload".into()),
            });
            continue;
        }

        if rule.send_once
            && (history.was_delivered(&rule.id, &event.beacon, layout.version)
                || scheduler.has_pending_for(&rule.id, &event.beacon, layout.version))
        {
            resolution.skipped.push(SkippedRule {
                rule_id: rule.id.clone(),
                reason: SkipReason::AlreadySent,
            });
            continue;
        }

        let due_at = now + Duration::milliseconds(i64::try_from(rule.delay_ms).unwrap_or(0));
        for payload in rule.actions.iter().filter(|p| p.is_well_formed()) {
            resolution.actions.push(ResolvedAction {
                id: Uuid::new_v4(),
                rule_id: rule.id.clone(),
                layout_version: layout.version,
                beacon: event.beacon.clone(),
                event_kind: event.kind,
                payload: payload.clone(),
                due_at,
                created_at: now,
            });
        }
    }

    // Stable sort: ties keep rule declaration order.
    resolution.actions.sort_by_key(|a| a.due_at);

    for skip in &resolution.skipped {
        if let SkipReason::Malformed(reason) = &skip.reason {
            warn!(rule = %skip.rule_id, %reason, "failed to resolve rule");
        }
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{parse_layout, Rule, RuleTrigger};
    use crate::scheduler::DelayedActionScheduler;
    use crate::storage::Storage;
    use crate::types::BeaconPattern;
    use chrono::TimeZone;

    fn region() -> Uuid {
        Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap()
    }

    fn beacon() -> BeaconId {
        BeaconId::new(region(), 1001, 7)
    }

    fn enter_event(at: DateTime<Utc>) -> BeaconEvent {
        BeaconEvent {
            beacon: beacon(),
            kind: EventKind::Enter,
            occurred_at: at,
        }
    }

    fn rule(id: &str, trigger: RuleTrigger, delay_ms: u64, send_once: bool) -> Rule {
        Rule {
            id: id.to_string(),
            pattern: BeaconPattern {
                uuid: region(),
                major: Some(1001),
                minor: None,
            },
            trigger,
            actions: vec![ActionPayload {
                subject: Some(format!("subject for {id}")),
                ..Default::default()
            }],
            send_once,
            delay_ms,
            valid_from: None,
            valid_until: None,
        }
    }

    fn layout_of(rules: Vec<Rule>) -> Layout {
        Layout { version: 1, rules }
    }

    fn stores(dir: &tempfile::TempDir) -> (HistoryStore, DelayedActionScheduler) {
        let storage = Storage::new(dir.path().to_path_buf());
        (
            HistoryStore::open(storage.clone()).unwrap(),
            DelayedActionScheduler::open(storage).unwrap(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_matching_rule_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);
        let layout = layout_of(vec![rule("r1", RuleTrigger::Enter, 0, false)]);

        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(resolution.actions.len(), 1);
        assert_eq!(resolution.actions[0].rule_id, "r1");
        assert_eq!(resolution.actions[0].due_at, now());
        assert!(resolution.actions[0].is_due(now()));
    }

    #[test]
    fn test_trigger_and_pattern_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);

        let mut other_region = rule("other", RuleTrigger::Enter, 0, false);
        other_region.pattern = BeaconPattern {
            uuid: Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap(),
            major: None,
            minor: None,
        };

        let layout = layout_of(vec![
            rule("on-exit", RuleTrigger::Exit, 0, false),
            other_region,
            rule("on-any", RuleTrigger::Any, 0, false),
        ]);

        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(resolution.actions.len(), 1);
        assert_eq!(resolution.actions[0].rule_id, "on-any");
        assert!(resolution.skipped.is_empty());
    }

    #[test]
    fn test_none_event_resolves_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);
        let layout = layout_of(vec![rule("r1", RuleTrigger::Any, 0, false)]);

        let event = BeaconEvent {
            beacon: beacon(),
            kind: EventKind::None,
            occurred_at: now(),
        };
        let resolution = resolve(&event, &layout, &history, &scheduler, now());
        assert!(resolution.actions.is_empty());
    }

    #[test]
    fn test_send_once_against_history() {
        let dir = tempfile::tempdir().unwrap();
        let (mut history, scheduler) = stores(&dir);
        let layout = layout_of(vec![rule("once", RuleTrigger::Enter, 0, true)]);

        let first = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(first.actions.len(), 1);
        history.record_action(&first.actions[0]).unwrap();

        let second = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert!(second.actions.is_empty());
        assert_eq!(second.skipped.len(), 1);
        assert_eq!(second.skipped[0].reason, SkipReason::AlreadySent);
    }

    #[test]
    fn test_send_once_against_pending_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let (history, mut scheduler) = stores(&dir);
        let layout = layout_of(vec![rule("once", RuleTrigger::Enter, 60_000, true)]);

        let first = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(first.actions.len(), 1);
        scheduler
            .schedule(first.actions[0].clone(), now())
            .unwrap();

        // Re-fired event inside the delay window: still suppressed.
        let second = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert!(second.actions.is_empty());
        assert_eq!(second.skipped[0].reason, SkipReason::AlreadySent);
    }

    #[test]
    fn test_send_once_scoped_to_layout_version() {
        let dir = tempfile::tempdir().unwrap();
        let (mut history, scheduler) = stores(&dir);
        let layout = layout_of(vec![rule("once", RuleTrigger::Enter, 0, true)]);

        let first = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        history.record_action(&first.actions[0]).unwrap();

        let mut next_version = layout_of(vec![rule("once", RuleTrigger::Enter, 0, true)]);
        next_version.version = 2;

        let again = resolve(&enter_event(now()), &next_version, &history, &scheduler, now());
        assert_eq!(again.actions.len(), 1);
    }

    #[test]
    fn test_immediate_sorts_before_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);

        // Declared delayed-first to prove ordering is by due time.
        let layout = layout_of(vec![
            rule("delayed", RuleTrigger::Enter, 60_000, false),
            rule("immediate", RuleTrigger::Enter, 0, false),
        ]);

        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(resolution.actions.len(), 2);
        assert_eq!(resolution.actions[0].rule_id, "immediate");
        assert_eq!(resolution.actions[1].rule_id, "delayed");
        assert_eq!(
            resolution.actions[1].due_at,
            now() + Duration::milliseconds(60_000)
        );
        assert!(!resolution.actions[1].is_due(now()));
    }

    #[test]
    fn test_equal_due_times_keep_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);
        let layout = layout_of(vec![
            rule("first", RuleTrigger::Enter, 0, false),
            rule("second", RuleTrigger::Enter, 0, false),
        ]);

        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        let ids: Vec<&str> = resolution.actions.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn test_malformed_rule_skipped_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);

        let mut malformed = rule("broken", RuleTrigger::Enter, 0, false);
        malformed.actions = vec![ActionPayload::default()];

        let layout = layout_of(vec![malformed, rule("good", RuleTrigger::Enter, 0, false)]);

        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(resolution.actions.len(), 1);
        assert_eq!(resolution.actions[0].rule_id, "good");
        assert!(matches!(
            resolution.skipped[0].reason,
            SkipReason::Malformed(_)
        ));
    }

    #[test]
    fn test_rule_outside_validity_window() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);

        let mut expired = rule("expired", RuleTrigger::Enter, 0, false);
        expired.valid_until = Some(now() - Duration::hours(1));

        let layout = layout_of(vec![expired]);
        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert!(resolution.actions.is_empty());
        assert_eq!(resolution.skipped[0].reason, SkipReason::OutsideValidity);
    }

    #[test]
    fn test_multiple_payloads_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);

        let mut multi = rule("multi", RuleTrigger::Enter, 0, false);
        multi.actions.push(ActionPayload {
            url: Some("https://example.com/offer".into()),
            ..Default::default()
        });

        let layout = layout_of(vec![multi]);
        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(resolution.actions.len(), 2);
        // Every instantiated action carries its own id.
        assert_ne!(resolution.actions[0].id, resolution.actions[1].id);
    }

    #[test]
    fn test_parse_layout_feeds_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let (history, scheduler) = stores(&dir);

        let body = format!(
            r#"{{
                "version": 9,
                "rules": [{{
                    "id": "wire",
                    "pattern": "{}:1001:7",
                    "trigger": "any",
                    "actions": [{{"body": "seen"}}]
                }}]
            }}"#,
            region()
        );
        let layout = parse_layout(&body).unwrap();

        let resolution = resolve(&enter_event(now()), &layout, &history, &scheduler, now());
        assert_eq!(resolution.actions.len(), 1);
        assert_eq!(resolution.actions[0].layout_version, 9);
    }
}
