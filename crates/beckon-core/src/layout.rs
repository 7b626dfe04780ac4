//! Layout management: the versioned ruleset mapping beacon events to actions.
//!
//! The layout is fetched from a remote service, cached on disk, and swapped
//! in as an immutable [`Arc`] snapshot, so a resolution pass observes either
//! the old or the new ruleset in full, never a partial mix. A failed refresh
//! always retains the previous snapshot; "no layout at all" is a distinct
//! state the resolver short-circuits on.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::LayoutConfig;
use crate::error::{BeckonError, Result};
use crate::storage::Storage;
use crate::types::{BeaconPattern, EventKind};

/// The payload carried by a rule's action: what gets shown or dispatched
/// when the rule fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ActionPayload {
    /// Short title, e.g. a notification subject line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Longer text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Link to open when the action is activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Opaque application-defined JSON carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub extra: Option<serde_json::Value>,
}

impl ActionPayload {
    /// A payload is usable when at least one of its fields carries content.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let has_text = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        has_text(&self.subject) || has_text(&self.body) || has_text(&self.url) || self.extra.is_some()
    }
}

/// Which beacon event kinds a rule fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTrigger {
    /// Fire when the beacon enters range.
    Enter,
    /// Fire when the beacon leaves range.
    Exit,
    /// Fire on either transition.
    Any,
}

impl RuleTrigger {
    /// Returns `true` if an event of `kind` activates this trigger.
    #[must_use]
    pub const fn matches(self, kind: EventKind) -> bool {
        match self {
            Self::Enter => matches!(kind, EventKind::Enter),
            Self::Exit => matches!(kind, EventKind::Exit),
            Self::Any => kind.is_transition(),
        }
    }
}

/// One entry of the ruleset: trigger pattern, event kind, and the actions it
/// produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier assigned by the backend.
    pub id: String,

    /// Which beacon identities this rule applies to.
    pub pattern: BeaconPattern,

    /// Which event kinds fire the rule.
    pub trigger: RuleTrigger,

    /// Action payloads instantiated when the rule fires.
    pub actions: Vec<ActionPayload>,

    /// Deliver at most once per beacon identity per layout version.
    #[serde(default)]
    pub send_once: bool,

    /// Delay before execution, in milliseconds; zero executes immediately.
    #[serde(default)]
    pub delay_ms: u64,

    /// Start of the validity window, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Rule {
    /// A rule is structurally valid when it has an id and at least one
    /// usable action payload.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty() && self.actions.iter().any(ActionPayload::is_well_formed)
    }

    /// Whether `now` falls inside the rule's validity window.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| now >= from)
            && self.valid_until.map_or(true, |until| now < until)
    }
}

/// An immutable ruleset snapshot, replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    /// Version assigned by the backend; send-once bookkeeping is scoped to it.
    pub version: u64,

    /// The rules, in backend declaration order (the resolver's tie-break).
    pub rules: Vec<Rule>,
}

/// The persisted form of a layout snapshot plus its fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedLayout {
    /// When the snapshot was fetched from the backend.
    pub fetched_at: DateTime<Utc>,

    /// The snapshot itself.
    pub layout: Layout,
}

/// Observable freshness of the current layout snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayoutValidity {
    /// No layout has ever been fetched or cached; resolution short-circuits.
    Missing,
    /// The snapshot is current.
    Valid,
    /// A snapshot exists but is due for refresh; resolution still uses it.
    Stale,
}

/// Holds the current ruleset, its disk cache, and its refresh policy.
pub struct LayoutStore {
    storage: Storage,
    client: reqwest::Client,
    source_url: Option<String>,
    max_age: Duration,
    timezone: Tz,
    current: Option<Arc<Layout>>,
    fetched_at: Option<DateTime<Utc>>,
    invalidated: bool,
    validity_tx: watch::Sender<LayoutValidity>,
}

impl LayoutStore {
    /// Open the store, loading the cached snapshot if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the cache file exists but cannot be read; a
    /// missing cache is the normal first-run state.
    pub fn open(storage: Storage, config: &LayoutConfig, timezone: Tz) -> Result<Self> {
        let cached = storage.load_cached_layout()?;
        let (current, fetched_at) = match cached {
            Some(c) => {
                debug!(version = c.layout.version, "loaded layout cache");
                (Some(Arc::new(c.layout)), Some(c.fetched_at))
            }
            None => (None, None),
        };

        let mut store = Self {
            storage,
            client: reqwest::Client::new(),
            source_url: config.source_url.clone(),
            max_age: Duration::hours(i64::try_from(config.max_age_hours).unwrap_or(24)),
            timezone,
            current,
            fetched_at,
            invalidated: false,
            validity_tx: watch::channel(LayoutValidity::Missing).0,
        };
        store.publish_validity(Utc::now());
        Ok(store)
    }

    /// The current snapshot, possibly stale. `None` is the distinct
    /// "no layout" state.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Layout>> {
        self.current.clone()
    }

    /// Version of the current snapshot, if any.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.current.as_ref().map(|l| l.version)
    }

    /// When the current snapshot was fetched.
    #[must_use]
    pub const fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Subscribe to validity-changed notifications.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LayoutValidity> {
        self.validity_tx.subscribe()
    }

    /// Freshness of the current snapshot at `now`.
    #[must_use]
    pub fn validity(&self, now: DateTime<Utc>) -> LayoutValidity {
        if self.current.is_none() {
            LayoutValidity::Missing
        } else if self.is_stale(now) {
            LayoutValidity::Stale
        } else {
            LayoutValidity::Valid
        }
    }

    /// Whether the snapshot is due for refresh: explicitly invalidated,
    /// older than the maximum age, or fetched before the most recent local
    /// midnight (the once-per-day refresh anchor).
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let Some(fetched_at) = self.fetched_at else {
            return true;
        };
        if self.invalidated || now.signed_duration_since(fetched_at) > self.max_age {
            return true;
        }
        self.last_local_midnight(now)
            .map_or(false, |midnight| fetched_at < midnight)
    }

    /// Mark the snapshot stale (the backend's beacon-signature side channel),
    /// publishing the validity change. The snapshot stays usable until the
    /// next successful refresh.
    pub fn invalidate(&mut self) {
        if self.current.is_some() {
            self.invalidated = true;
            info!("layout invalidated; refresh scheduled for next cycle");
        }
        self.publish_validity(Utc::now());
    }

    /// Fetch the layout from the remote source and install it.
    ///
    /// # Errors
    ///
    /// [`BeckonError::Network`] for transport/HTTP failures,
    /// [`BeckonError::Parse`] for an undecodable body, and
    /// [`BeckonError::ConfigValidation`] when no source URL is configured.
    /// The previous snapshot is retained on every failure path.
    pub async fn fetch(&mut self) -> Result<Arc<Layout>> {
        let url = self.source_url.clone().ok_or_else(|| {
            BeckonError::ConfigValidation("no layout source URL configured".into())
        })?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BeckonError::Network(format!("layout fetch: {e}")))?
            .error_for_status()
            .map_err(|e| BeckonError::Network(format!("layout fetch: {e}")))?;

        let body = response
            .text()
            .await
            .map_err(|e| BeckonError::Network(format!("layout fetch body: {e}")))?;

        let layout = parse_layout(&body)?;
        Ok(self.install(layout, Utc::now()))
    }

    /// Refresh the snapshot if it is stale, retaining the previous snapshot
    /// when the fetch fails. Returns `true` when a new snapshot was
    /// installed.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error only when there is no previous snapshot to
    /// fall back on (callers then run with no-layout semantics).
    pub async fn ensure_fresh(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if self.source_url.is_none() {
            return Ok(false);
        }
        if !self.is_stale(now) {
            return Ok(false);
        }
        match self.fetch().await {
            Ok(layout) => {
                info!(version = layout.version, rules = layout.rules.len(), "layout refreshed");
                Ok(true)
            }
            Err(e) if self.current.is_some() => {
                warn!(error = %e, "layout refresh failed; retaining previous snapshot");
                self.publish_validity(now);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Install a fetched layout as the current snapshot and persist the
    /// cache. Cache persistence failure is non-fatal: the in-memory snapshot
    /// still serves this process.
    fn install(&mut self, layout: Layout, fetched_at: DateTime<Utc>) -> Arc<Layout> {
        let snapshot = Arc::new(layout);
        self.current = Some(Arc::clone(&snapshot));
        self.fetched_at = Some(fetched_at);
        self.invalidated = false;

        let cached = CachedLayout {
            fetched_at,
            layout: (*snapshot).clone(),
        };
        if let Err(e) = self.storage.save_cached_layout(&cached) {
            warn!(error = %e, "failed to persist layout cache");
        }
        self.publish_validity(fetched_at);
        snapshot
    }

    fn publish_validity(&mut self, now: DateTime<Utc>) {
        self.validity_tx.send_replace(self.validity(now));
    }

    /// The most recent midnight in the configured timezone, in UTC.
    fn last_local_midnight(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_date = now.with_timezone(&self.timezone).date_naive();
        let midnight = local_date.and_hms_opt(0, 0, 0)?;
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Decode a layout body, dropping structurally invalid rules rather than
/// rejecting the whole snapshot because of one bad entry.
pub(crate) fn parse_layout(body: &str) -> Result<Layout> {
    let mut layout: Layout =
        serde_json::from_str(body).map_err(|e| BeckonError::Parse(e.to_string()))?;

    let before = layout.rules.len();
    layout.rules.retain(Rule::is_well_formed);
    let dropped = before - layout.rules.len();
    if dropped > 0 {
        warn!(dropped, version = layout.version, "discarded malformed rules from fetched layout");
    }
    Ok(layout)
}
