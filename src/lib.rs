#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Distributed, per-client token-bucket rate limiting as tower middleware.
//!
//! Every request is mapped to a client key (peer IP by default). The key's bucket is fetched
//! from a shared [`BucketStore`], refilled for the time since its last update, debited one
//! token, and written back. Requests with no whole token left are answered with
//! `429 Too Many Requests` before they reach your service.
//!
//! ## Features
//!
//! - **Continuous refill**: `capacity` tokens per `window`, accrued per millisecond
//! - **Shared state**: buckets live in an external store so every process sees the same quota
//! - **Bounded latency**: each store call has a timeout and is attempted once
//! - **Explicit degradation**: store outages resolve through a single [`FailurePolicy`]
//!   (fail-open by default)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tollgate::{InMemoryBucketStore, LimiterConfig, RateLimitLayer, TokenBucketLimiter};
//! use tower::ServiceBuilder;
//!
//! let config = LimiterConfig::builder()
//!     .capacity(10)
//!     .window(std::time::Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//! let store = Arc::new(InMemoryBucketStore::new());
//! let limiter = Arc::new(TokenBucketLimiter::new(store, config));
//!
//! let service = ServiceBuilder::new()
//!     .layer(RateLimitLayer::new(limiter))
//!     .service_fn(|_req: http::Request<String>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(String::from("ok")))
//!     });
//! # drop(service);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod rate_limit;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, LimiterConfigBuilder, Settings};
pub use error::{ConfigError, MalformedBucketRecord, StoreError};
pub use rate_limit::{
    BucketRecord, BucketStore, Decision, FailurePolicy, HeaderKey, InMemoryBucketStore,
    KeyExtractor, PeerIp, RateLimitLayer, RateLimitService, RateLimiter, TokenBucket,
    TokenBucketLimiter,
};
