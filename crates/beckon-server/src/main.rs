//! # beckon-server
//!
//! HTTP server for the beckon beacon-to-action resolution engine.
//!
//! This binary provides:
//! - REST API for observation ingestion, layout, actions, and history
//! - The periodic engine tick that executes delayed actions
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beckon-server
//!
//! # Production (BECKON_ENV=production enables file logging)
//! ./beckon-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use beckon_server::{api, logging, spawn_engine_ticker, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let is_production = std::env::var("BECKON_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);
    logging::init(is_production)?;

    info!("Starting beckon-server");

    // Build state: configuration, storage, and the engine
    let state = state::build_state()?;

    // The timer tick is the sole driver of time-based execution
    let tick_interval_secs = state.read().await.config.engine.tick_interval_secs;
    let _ticker = spawn_engine_ticker(state.clone(), tick_interval_secs);

    // Build the application router
    let app = api::create_router(state);

    // Bind to address
    let port = std::env::var("BECKON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
