//! Convenient re-exports for common Tollgate types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    config::{LimiterConfig, LimiterConfigBuilder, Settings},
    error::{ConfigError, StoreError},
    rate_limit::{
        BucketRecord, BucketStore, Decision, FailurePolicy, HeaderKey, InMemoryBucketStore,
        KeyExtractor, PeerIp, RateLimitLayer, RateLimiter, TokenBucketLimiter,
    },
};
