//! Error types for bucket stores, bucket records, and configuration.
use std::time::Duration;

/// Failure talking to the bucket store.
///
/// Both variants are handled by the limiter's [`FailurePolicy`](crate::FailurePolicy); neither
/// ever reaches the client as a 5xx.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or connection failure reported by the backend.
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
    /// The store call did not complete within the configured timeout.
    #[error("bucket store call timed out after {0:?}")]
    TimedOut(Duration),
}

impl StoreError {
    /// Build an `Unavailable` error from any displayable backend error.
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// A stored record whose fields do not parse as a token bucket.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed bucket record: field `{field}` = {value:?}")]
pub struct MalformedBucketRecord {
    pub field: &'static str,
    /// Raw value found in the store, `None` when the field is missing.
    pub value: Option<String>,
}

/// Errors produced while validating limiter configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity must be > 0.
    #[error("capacity must be > 0 (got {0})")]
    InvalidCapacity(u32),
    /// Window must be at least one millisecond.
    #[error("window must be >= 1ms (got {0:?})")]
    InvalidWindow(Duration),
    /// Store timeout must be > 0.
    #[error("store_timeout must be > 0 (got {0:?})")]
    InvalidStoreTimeout(Duration),
    /// An environment variable held a value that could not be used.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },
}
