//! Beckon background task runner
//!
//! Runs exactly one engine cycle and exits. Intended to be invoked by a
//! systemd timer or by a scan daemon reacting to an advertisement sighting:
//! the short-lived background wakes the engine is designed around. The
//! process may be killed at any point; every durable hand-off in the engine
//! is restart-safe, and the process exit is the completion signal that
//! releases the host's execution lease.
//!
//! Actions resolved during a background cycle cannot surface in-process, so
//! they land in the durable inbox the foreground server drains on its next
//! session.
//!
//! # Environment Variables
//!
//! - `BECKON_TRIGGER`: Optional. "timer" or "advertisement" (default: timer)
//! - `BECKON_CONFIG`: Optional. Path to the config file (default: the
//!   platform config path)
//! - `BECKON_DATA_DIR`: Optional. Overrides the data directory
//! - `BECKON_LOG_LEVEL`: Optional. Logging level (default: info)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use beckon_core::{BackgroundSink, BeckonConfig, Engine, Storage, TriggerKind};

/// Environment variable names
mod env_vars {
    pub const TRIGGER: &str = "BECKON_TRIGGER";
    pub const CONFIG: &str = "BECKON_CONFIG";
    pub const DATA_DIR: &str = "BECKON_DATA_DIR";
    pub const LOG_LEVEL: &str = "BECKON_LOG_LEVEL";
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let trigger = trigger_from_env()?;
    info!(?trigger, "beckon background task starting");

    let config = load_config().context("loading configuration")?;
    let storage = open_storage(&config).context("opening storage")?;

    let sink = Arc::new(BackgroundSink::new(storage.clone()));
    let mut engine =
        Engine::open(&config, storage, sink).context("opening engine stores")?;

    // One cycle, no fresh observations: refresh the layout if due, drain
    // whatever delayed work has come due, flush history.
    let report = engine.run_cycle(&[], trigger).await;

    info!(
        delayed_executed = report.delayed_executed,
        purged = report.purged,
        uploaded = report.uploaded,
        layout_version = ?report.layout_version,
        "beckon background task finished"
    );
    Ok(())
}

fn init_logging() {
    let level = std::env::var(env_vars::LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .compact()
        .init();
}

fn trigger_from_env() -> Result<TriggerKind> {
    match std::env::var(env_vars::TRIGGER).as_deref() {
        Err(_) | Ok("timer") => Ok(TriggerKind::Timer),
        Ok("advertisement") => Ok(TriggerKind::Advertisement),
        Ok(other) => bail!("unknown {} value '{other}' (expected 'timer' or 'advertisement')", env_vars::TRIGGER),
    }
}

fn load_config() -> Result<BeckonConfig> {
    match std::env::var(env_vars::CONFIG) {
        Ok(path) => Ok(BeckonConfig::load_from(&PathBuf::from(path))?),
        Err(_) => Ok(BeckonConfig::load()?),
    }
}

fn open_storage(config: &BeckonConfig) -> Result<Storage> {
    if let Ok(dir) = std::env::var(env_vars::DATA_DIR) {
        return Ok(Storage::new(PathBuf::from(dir)));
    }
    match &config.data_dir {
        Some(dir) => Ok(Storage::new(dir.clone())),
        None => {
            let storage = Storage::open_default()?;
            if !storage.data_dir().exists() {
                warn!(dir = %storage.data_dir().display(), "data directory does not exist yet; first run will create it");
            }
            Ok(storage)
        }
    }
}
