//! Error types for config and window-model parsing.

use thiserror::Error;

/// Errors raised while parsing or validating configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid time of day '{0}' (expected HH:MM)")]
    InvalidTime(String),

    #[error("invalid day of week '{0}'")]
    InvalidDay(String),

    #[error("invalid guest kind '{0}'")]
    InvalidGuestKind(String),

    #[error("invalid window '{name}': {reason}")]
    InvalidWindow { name: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}
