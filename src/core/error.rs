//! Error handling - hierarchical errors with loop-boundary policy helpers

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error hierarchy.
///
/// Transient errors are retried on the next scheduled iteration, validation
/// errors drop the offending trade and continue, configuration errors skip
/// the offending strategy at load time, and fatal errors stop the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing parameters, unparseable files)
    #[error("configuration error: {0}")]
    Config(String),

    /// External call exceeded its budget
    #[error("timeout after {0:?} during {1}")]
    Timeout(Duration, String),

    /// Data-feed connectivity or protocol failure
    #[error("feed error: {0}")]
    Feed(String),

    /// Order-gateway connectivity or rejection
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Strategy evaluation failure (strategy name, cause)
    #[error("strategy '{0}' failed: {1}")]
    Strategy(String, String),

    /// BUY validation: trade cost exceeds available balance
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    /// SELL validation: amount exceeds the held position
    #[error("insufficient position in {symbol}: held {held}, required {required}")]
    InsufficientPosition {
        symbol: String,
        held: Decimal,
        required: Decimal,
    },

    /// Malformed or unusable signal/order
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unrecoverable state corruption - stops the engine
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Retryable on the next scheduled iteration, never busy-retried inline.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(..) | Error::Feed(_) | Error::Gateway(_))
    }

    /// The specific trade is dropped, the loop continues.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds { .. }
                | Error::InsufficientPosition { .. }
                | Error::InvalidSignal(_)
        )
    }

    /// Requires a clean engine shutdown.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}
