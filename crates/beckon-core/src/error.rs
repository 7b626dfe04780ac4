//! Unified error types for the beckon core library.
//!
//! This module provides a unified error type [`BeckonError`] that covers all
//! failure modes across the beckon system.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Component-local recovery**: Most failures degrade gracefully; callers
//!   use the classification helpers to decide what to do
//! - **Context preservation**: Wrapped errors maintain their original context
//!
//! # Example
//!
//! ```rust
//! use beckon_core::error::{BeckonError, Result};
//! use std::path::PathBuf;
//!
//! fn load_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(BeckonError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all beckon operations.
///
/// Variants follow the system error taxonomy: network failures are retried on
/// a later cycle, parse failures discard the offending input while retaining
/// the previous valid state, storage failures degrade to best-effort
/// in-memory behavior, and logic errors are absorbed rather than propagated.
#[derive(Debug, Error)]
pub enum BeckonError {
    // =========================================================================
    // NETWORK ERRORS
    // =========================================================================
    /// A remote call (layout fetch, telemetry upload) failed at the transport
    /// or HTTP level. Retried on the next scheduled cycle.
    #[error("Network error: {0}")]
    Network(String),

    // =========================================================================
    // PARSE ERRORS
    // =========================================================================
    /// A fetched layout (or one of its rules) could not be decoded. The
    /// previous valid layout is retained.
    #[error("Failed to parse layout: {0}")]
    Parse(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading durable records.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // LOGIC ERRORS
    // =========================================================================
    /// An internally inconsistent state was observed (e.g. an exit
    /// classification with no tracked enter). Callers treat this as a
    /// no-op event, never a crash.
    #[error("Inconsistent engine state: {0}")]
    Logic(String),
}

/// A specialized [`Result`] type for beckon operations.
///
/// This type alias eliminates the need to specify the error type explicitly
/// when returning results from beckon functions.
pub type Result<T> = std::result::Result<T, BeckonError>;

impl BeckonError {
    /// Returns `true` if this error came from a remote call.
    #[inline]
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns `true` if this error came from decoding a layout.
    #[inline]
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParse(_) | Self::ConfigValidation(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Io(_))
    }

    /// Returns `true` if this error clears on its own and the operation is
    /// safe to retry on a later cycle without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Parse(_) | Self::Logic(_))
    }

    /// Returns a machine-readable error code for API responses and logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK_ERROR",
            Self::Parse(_) => "LAYOUT_PARSE_ERROR",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParse(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidation(_) => "CONFIG_VALIDATION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Logic(_) => "LOGIC_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl From<toml::de::Error> for BeckonError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<toml::ser::Error> for BeckonError {
    fn from(err: toml::ser::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
