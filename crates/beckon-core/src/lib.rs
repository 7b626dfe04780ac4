//! # beckon-core
//!
//! Core business logic for the beckon beacon-to-action resolution engine.
//!
//! This crate provides:
//! - Presence tracking (classifying beacon sightings into enter/exit events)
//! - Layout management (the versioned ruleset fetched from the backend)
//! - Action resolution (matching events against rules, with send-once and
//!   validity-window filters)
//! - Delayed action scheduling with durable, restart-safe records
//! - An append-only history store used for deduplication and telemetry
//! - The engine façade orchestrating one invocation cycle end to end
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`presence`] - Enter/exit classification with debounce and burst suppression
//! - [`layout`] - Layout fetch, cache, validation, and atomic snapshot swap
//! - [`resolver`] - Event-to-action resolution against the current layout
//! - [`scheduler`] - Durable deferral and draining of delayed actions
//! - [`history`] - Append-only event/action history with retention
//! - [`storage`] - JSON-file persistence under a single data directory
//! - [`delivery`] - Action sinks for foreground and background hosts
//! - [`telemetry`] - Batch upload of undelivered history entries
//! - [`engine`] - The per-invocation façade and its phase machine
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Beacon identity, observation, and event types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod history;
pub mod layout;
pub mod presence;
pub mod resolver;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
pub mod types;

// Re-export primary types for convenience
pub use config::{
    BeckonConfig, EngineConfig, HistoryConfig, LayoutConfig, PresenceConfig, TelemetryConfig,
};
pub use delivery::{
    take_background_actions, ActionSink, BackgroundInbox, BackgroundSink, ChannelSink, NullSink,
};
pub use engine::{CycleReport, Engine, EngineEvent, EnginePhase, TriggerKind};
pub use error::{BeckonError, Result};
pub use history::{HistoryEntry, HistoryKind, HistoryStore, RetentionPolicy};
pub use layout::{ActionPayload, CachedLayout, Layout, LayoutStore, LayoutValidity, Rule, RuleTrigger};
pub use presence::{PresencePolicy, PresenceState, PresenceTracker};
pub use resolver::{resolve, Resolution, ResolvedAction, SkipReason, SkippedRule};
pub use scheduler::{DelayedActionRecord, DelayedActionScheduler};
pub use storage::Storage;
pub use telemetry::TelemetryUploader;
pub use types::{BeaconEvent, BeaconId, BeaconObservation, BeaconPattern, EventKind};
