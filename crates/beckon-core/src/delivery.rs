//! Action delivery: the sink boundary between the engine and its host.
//!
//! Foreground hosts receive actions as in-process events on a broadcast
//! channel. Background invocations have no UI to deliver into, so their sink
//! appends to a durable inbox and raises a flag the foreground app checks on
//! its next session.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::resolver::ResolvedAction;
use crate::storage::Storage;

/// Receives resolved actions as they execute.
///
/// Delivery is at-most-once per action id: the engine marks an action
/// executed before calling the sink, and never calls the sink twice for the
/// same id.
pub trait ActionSink: Send + Sync {
    /// Deliver one action to the host.
    ///
    /// # Errors
    ///
    /// A failed delivery is logged by the caller and not retried.
    fn deliver(&self, action: &ResolvedAction) -> Result<()>;
}

/// Foreground sink: publishes actions on a broadcast channel.
pub struct ChannelSink {
    tx: broadcast::Sender<ResolvedAction>,
}

impl ChannelSink {
    /// Create a sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to delivered actions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ResolvedAction> {
        self.tx.subscribe()
    }
}

impl ActionSink for ChannelSink {
    fn deliver(&self, action: &ResolvedAction) -> Result<()> {
        // No subscribers is fine; the action is already in history.
        let _ = self.tx.send(action.clone());
        Ok(())
    }
}

/// The durable hand-off from background invocations to the foreground app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackgroundInbox {
    /// Set whenever a background cycle delivered at least one action the
    /// foreground app has not picked up yet.
    pub new_actions: bool,

    /// The actions awaiting pickup, in delivery order.
    pub actions: Vec<ResolvedAction>,
}

/// Background sink: persists actions to the inbox and raises the
/// new-actions flag.
pub struct BackgroundSink {
    storage: Storage,
}

impl BackgroundSink {
    /// Create a sink writing to the given storage.
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl ActionSink for BackgroundSink {
    fn deliver(&self, action: &ResolvedAction) -> Result<()> {
        let mut inbox = self.storage.load_inbox()?;
        inbox.actions.push(action.clone());
        inbox.new_actions = true;
        self.storage.save_inbox(&inbox)?;
        debug!(action = %action.id, queued = inbox.actions.len(), "queued action for foreground pickup");
        Ok(())
    }
}

/// Drain the background inbox, clearing the new-actions flag. Returns the
/// actions that were waiting.
pub fn take_background_actions(storage: &Storage) -> Result<Vec<ResolvedAction>> {
    let inbox = storage.load_inbox()?;
    if inbox.actions.is_empty() && !inbox.new_actions {
        return Ok(Vec::new());
    }
    storage.save_inbox(&BackgroundInbox::default())?;
    Ok(inbox.actions)
}

/// A sink that drops everything; used when the host consumes actions purely
/// through the engine's event channel.
pub struct NullSink;

impl ActionSink for NullSink {
    fn deliver(&self, _action: &ResolvedAction) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSink").finish_non_exhaustive()
    }
}
