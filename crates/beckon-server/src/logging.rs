//! Logging initialization and configuration.
//!
//! Two modes, chosen by the caller:
//! - **Production**: JSON logs to rolling files plus compact stdout for the
//!   systemd journal
//! - **Development**: pretty stdout with span events
//!
//! The engine logs every degradation (failed fetch, failed persist, rejected
//! delivery) at `warn`, so a production filter of `info` is enough to see
//! when cycles start running in degraded modes.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Guards for the non-blocking writers; dropping them would silently stop
/// log output, so they live for the whole process.
static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Initialize the logging system.
///
/// The filter comes from `RUST_LOG` when set, else `BECKON_LOG_LEVEL`, else
/// `info`. Production mode additionally writes JSON lines to rolling files
/// under the platform log directory (`/var/log/beckon` on Linux); set
/// `BECKON_LOG_ROTATION=hourly` there to rotate hourly instead of daily.
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var("BECKON_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if !is_production {
        // Development: pretty stdout only, with span events for debugging.
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
            )
            .init();
        return Ok(());
    }

    let log_dir = log_directory();
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }

    let rotation = match std::env::var("BECKON_LOG_ROTATION").as_deref() {
        Ok("hourly") => Rotation::HOURLY,
        _ => Rotation::DAILY,
    };
    let file_appender = RollingFileAppender::new(rotation, &log_dir, "beckon.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            // Structured JSON for log shippers.
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        )
        .with(
            // Compact stdout for journald; it stamps its own timestamps.
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout_writer)
                .with_ansi(false)
                .without_time()
                .boxed(),
        )
        .init();

    let _ = GUARDS.set(vec![file_guard, stdout_guard]);
    Ok(())
}

/// Returns the appropriate log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beckon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beckon")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
