//! Error types for configuration handling.

use thiserror::Error;

/// Errors raised at the configuration boundary.
///
/// Invalid values are rejected here so they never reach the cache or the
/// breaker monitor.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration source could not be read or merged
    #[error("Configuration error: {0}")]
    Load(String),

    /// A setting value failed validation
    #[error("Invalid setting: {0}")]
    Invalid(String),

    /// Memory limit string could not be parsed
    #[error("Invalid memory limit '{value}': {reason}")]
    InvalidLimit { value: String, reason: String },

    /// IO error while reading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
