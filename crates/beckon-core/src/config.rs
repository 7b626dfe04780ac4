//! Application configuration management.
//!
//! Handles loading, saving, and validating beckon configuration including:
//! - Presence classification thresholds and timeouts
//! - Remote layout source and refresh policy
//! - Engine wake cadence and drain limits
//! - History retention and telemetry upload
//! - Deployment timezone (the daily-refresh anchor)

use std::path::PathBuf;

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BeckonError, Result};
use crate::presence::PresencePolicy;

/// Main application configuration.
///
/// Top-level keys come before the per-component tables so the struct
/// serializes to well-formed TOML in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeckonConfig {
    /// Deployment timezone; the daily layout refresh is anchored to local
    /// midnight here.
    #[serde(with = "timezone_serde")]
    pub timezone: Tz,

    /// Override the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Enter/exit classification tuning.
    pub presence: PresenceConfig,

    /// Remote layout source and refresh policy.
    pub layout: LayoutConfig,

    /// Engine wake cadence and drain limits.
    pub engine: EngineConfig,

    /// History retention.
    pub history: HistoryConfig,

    /// Telemetry upload.
    pub telemetry: TelemetryConfig,
}

/// Enter/exit classification tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Signal strength at or below which a beacon counts as out of range.
    /// Typical values: -100 (generous) to -85 (tight).
    pub out_of_range_dbm: i16,

    /// Minimum milliseconds between an enter and the exit (or re-enter) that
    /// may follow it.
    pub exit_timeout_ms: u64,

    /// Require the exit timeout to elapse before an exit fires, so one weak
    /// advertisement cannot flap the state.
    pub burst_suppression: bool,

    /// Compare the signal against the threshold with the historical exact
    /// equality instead of `<=`.
    pub legacy_exact_threshold: bool,
}

impl PresenceConfig {
    /// The classifier policy this configuration describes.
    #[must_use]
    pub fn policy(&self) -> PresencePolicy {
        PresencePolicy {
            out_of_range_dbm: self.out_of_range_dbm,
            exit_timeout: Duration::milliseconds(
                i64::try_from(self.exit_timeout_ms).unwrap_or(10_000),
            ),
            burst_suppression: self.burst_suppression,
            legacy_exact_threshold: self.legacy_exact_threshold,
        }
    }
}

/// Remote layout source and refresh policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// URL the layout is fetched from; `None` runs with the cache only.
    pub source_url: Option<String>,

    /// Maximum snapshot age before a refresh is forced, in hours.
    pub max_age_hours: u64,
}

/// Engine wake cadence and drain limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on drain rounds per cycle; keeps background invocations
    /// inside their execution-time budget.
    pub max_drain_rounds: u32,

    /// Foreground tick interval in seconds; the execution granularity of
    /// delayed actions.
    pub tick_interval_secs: u64,
}

/// History retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Days of history to retain before purging uploaded entries.
    pub retention_days: u64,
}

/// Telemetry upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Endpoint undelivered history entries are uploaded to; `None`
    /// disables uploads.
    pub endpoint: Option<String>,
}

impl Default for BeckonConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            data_dir: None,
            presence: PresenceConfig {
                out_of_range_dbm: -95,
                exit_timeout_ms: 10_000,
                burst_suppression: true,
                legacy_exact_threshold: false,
            },
            layout: LayoutConfig {
                source_url: None,
                max_age_hours: 24,
            },
            engine: EngineConfig {
                max_drain_rounds: 3,
                tick_interval_secs: 30,
            },
            history: HistoryConfig { retention_days: 30 },
            telemetry: TelemetryConfig { endpoint: None },
        }
    }
}

impl BeckonConfig {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read,
    /// parsed, or validated.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific path, falling back to defaults
    /// when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read,
    /// parsed, or validated.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the configuration for values no deployment can mean.
    ///
    /// # Errors
    ///
    /// Returns [`BeckonError::ConfigValidation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.presence.out_of_range_dbm >= 0 {
            return Err(BeckonError::ConfigValidation(format!(
                "presence.out_of_range_dbm must be negative (got {})",
                self.presence.out_of_range_dbm
            )));
        }
        if self.presence.exit_timeout_ms == 0 {
            return Err(BeckonError::ConfigValidation(
                "presence.exit_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.engine.max_drain_rounds == 0 {
            return Err(BeckonError::ConfigValidation(
                "engine.max_drain_rounds must be at least 1".into(),
            ));
        }
        if self.engine.tick_interval_secs == 0 {
            return Err(BeckonError::ConfigValidation(
                "engine.tick_interval_secs must be at least 1".into(),
            ));
        }
        if self.history.retention_days == 0 {
            return Err(BeckonError::ConfigValidation(
                "history.retention_days must be at least 1".into(),
            ));
        }
        for (field, url) in [
            ("layout.source_url", &self.layout.source_url),
            ("telemetry.endpoint", &self.telemetry.endpoint),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(BeckonError::ConfigValidation(format!(
                        "{field} must be an http(s) URL (got '{url}')"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Get the configuration file path.
    fn config_path() -> Result<PathBuf> {
        // On Linux deployments: /etc/beckon/config.toml
        // For development: the platform config dir for `beckon`
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/beckon/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "beckon").ok_or_else(|| {
                BeckonError::ConfigValidation("Cannot determine config directory".into())
            })?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
