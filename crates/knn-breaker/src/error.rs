//! Breaker error types.

use thiserror::Error;

/// Errors raised by breaker coordination.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// Reading or writing the shared flag failed
    #[error("Flag store error: {0}")]
    FlagStore(String),

    /// A fleet stats poll failed
    #[error("Stats poll failed for node {node}: {reason}")]
    Poll { node: String, reason: String },

    /// Fleet membership could not be determined
    #[error("Fleet lookup failed: {0}")]
    Fleet(String),

    /// Admission rejected while the breaker is tripped
    #[error("Circuit breaker is tripped; native memory is over the configured limit")]
    Tripped,
}
