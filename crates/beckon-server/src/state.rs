//! Application state shared across handlers.

use std::sync::Arc;

use beckon_core::{BeckonConfig, ChannelSink, Engine, Storage};
use tokio::sync::RwLock;

/// State owned by the server: configuration, storage handles, and the engine.
pub struct ServerState {
    /// Loaded configuration.
    pub config: BeckonConfig,

    /// Storage the engine persists through; also used to drain the
    /// background inbox.
    pub storage: Storage,

    /// The foreground engine instance.
    pub engine: Engine,

    /// The foreground action sink; delivered actions fan out to its
    /// subscribers.
    pub sink: Arc<ChannelSink>,
}

/// Shared, serialized access to the server state. The engine requires a
/// single logical invocation at a time, so every cycle runs under the write
/// lock.
pub type SharedState = Arc<RwLock<ServerState>>;

/// Build the server state from configuration on disk.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or a store cannot be
/// opened; both are startup-fatal.
pub fn build_state() -> anyhow::Result<SharedState> {
    let config = BeckonConfig::load()?;
    build_state_with(config)
}

/// Build the server state from an explicit configuration.
///
/// # Errors
///
/// Returns an error when a store cannot be opened.
pub fn build_state_with(config: BeckonConfig) -> anyhow::Result<SharedState> {
    let storage = match &config.data_dir {
        Some(dir) => Storage::new(dir.clone()),
        None => Storage::open_default()?,
    };
    let sink = Arc::new(ChannelSink::new(64));
    let engine = Engine::open(&config, storage.clone(), sink.clone())?;

    Ok(Arc::new(RwLock::new(ServerState {
        config,
        storage,
        engine,
        sink,
    })))
}
