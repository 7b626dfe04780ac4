//! # beckon-server
//!
//! HTTP server library for the beckon beacon-to-action resolution engine.
//!
//! This library provides the API handlers, shared state, and the periodic
//! engine tick that drives delayed-action execution.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::time::Duration;

use beckon_core::TriggerKind;
use tokio::task::JoinHandle;
use tracing::debug;

pub mod api;
pub mod logging;
pub mod state;

pub use state::{build_state, build_state_with, ServerState, SharedState};

/// Spawn the periodic engine tick.
///
/// Every `interval_secs` the engine runs a timer-triggered cycle with no
/// observations: delayed actions that have come due execute, the daily
/// layout refresh happens, and history is flushed. This loop is the sole
/// driver of time-based execution; its interval is the execution
/// granularity of delayed actions.
pub fn spawn_engine_ticker(state: SharedState, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let mut state_guard = state.write().await;
            let report = state_guard
                .engine
                .run_cycle(&[], TriggerKind::Timer)
                .await;
            drop(state_guard);

            if report.delayed_executed > 0 || report.uploaded > 0 {
                debug!(
                    delayed_executed = report.delayed_executed,
                    uploaded = report.uploaded,
                    "timer cycle did work"
                );
            }
        }
    })
}
