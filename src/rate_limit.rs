//! Rate limiting primitives.
//!
//! This module provides the building blocks for rate limiting:
//! - [`RateLimiter`]: The core trait for rate limiting logic.
//! - [`RateLimitLayer`]: Tower middleware that enforces the limit per client key.
//! - [`Decision`]: The result of a rate limit check (Admitted/Rejected).
//! - [`FailurePolicy`]: What to do when the bucket store cannot be reached.
//!
//! # Architecture
//!
//! - **Middleware**: `RateLimitLayer` wraps your service. It derives a client key with a
//!   [`KeyExtractor`] and asks a `RateLimiter` whether to admit the request.
//! - **Logic**: [`TokenBucketLimiter`] (in `strategies`) does the refill/consume math.
//! - **Storage**: [`BucketStore`] (in `store`) holds bucket records, in memory or in a remote
//!   key-value store shared by every process.
//!
//! # Consistency
//!
//! The fetch-compute-store cycle is not atomic with respect to the store. Two concurrent
//! requests for one key can read the same bucket and both write back, losing a decrement. The
//! limiter is a best-effort throttle: under contention it can admit more than `capacity`
//! requests per window. [`serialize_per_key`](crate::LimiterConfigBuilder::serialize_per_key)
//! closes the gap for traffic handled by a single process only.

use crate::error::StoreError;
use std::time::Duration;

pub mod bucket;
pub mod key;
mod locks;
pub mod middleware;
pub mod store;
pub mod strategies;

pub use bucket::{BucketRecord, TokenBucket};
pub use key::{HeaderKey, KeyExtractor, PeerIp};
pub use middleware::{RateLimitLayer, RateLimitService};
pub use store::{BucketStore, InMemoryBucketStore};
pub use strategies::TokenBucketLimiter;

/// Wait suggested to clients rejected because the store was unreachable under fail-closed.
pub const FAIL_CLOSED_RETRY_AFTER: Duration = Duration::from_secs(1);

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Admitted {
        /// Whole tokens left after this request, for `x-ratelimit-remaining`.
        /// `None` when no quota check happened (store outage under fail-open, or no key).
        remaining: Option<u32>,
    },
    /// The request is denied.
    Rejected {
        /// How long until the bucket holds a whole token again. Used for `Retry-After`.
        retry_after: Duration,
    },
}

impl Decision {
    /// Admission that skipped the quota check.
    pub fn unchecked() -> Self {
        Decision::Admitted { remaining: None }
    }

    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Rejected { .. })
    }
}

/// How the limiter resolves a check it could not complete.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit without consuming or persisting anything. Availability over strict quotas.
    #[default]
    FailOpen,
    /// Reject with [`FAIL_CLOSED_RETRY_AFTER`]. Strict quotas over availability.
    FailClosed,
}

impl FailurePolicy {
    /// The decision this policy substitutes for a failed check.
    pub fn fallback(self) -> Decision {
        match self {
            FailurePolicy::FailOpen => Decision::unchecked(),
            FailurePolicy::FailClosed => {
                Decision::Rejected { retry_after: FAIL_CLOSED_RETRY_AFTER }
            }
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Ok(FailurePolicy::FailOpen),
            "closed" | "fail-closed" | "fail_closed" => Ok(FailurePolicy::FailClosed),
            other => Err(format!("expected `open` or `closed`, got `{}`", other)),
        }
    }
}

/// Core interface for rate limiting logic.
///
/// This trait decouples the middleware from the algorithm and the storage backend.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Run one check-and-update cycle for `key`, surfacing store failures.
    async fn try_acquire(&self, key: &str) -> Result<Decision, StoreError>;

    /// Policy applied when `try_acquire` fails or panics.
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::FailOpen
    }

    /// Run one cycle and resolve store failures through [`failure_policy`](Self::failure_policy).
    async fn check_and_consume(&self, key: &str) -> Decision {
        match self.try_acquire(key).await {
            Ok(decision) => decision,
            Err(e) => {
                let policy = self.failure_policy();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    ?policy,
                    "rate limit check skipped: bucket store failure"
                );
                policy.fallback()
            }
        }
    }
}
