use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::StoreError;
use crate::rate_limit::bucket::TokenBucket;
use crate::rate_limit::locks::KeyLocks;
use crate::rate_limit::store::BucketStore;
use crate::rate_limit::{Decision, FailurePolicy, RateLimiter};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A distributed token bucket rate limiter.
///
/// Each key gets `capacity` tokens that refill continuously over `window`. Bucket state lives in
/// the [`BucketStore`]; the limiter keeps nothing between calls beyond the optional per-key
/// locks. One call is one fetch, one in-memory update, one store, each store call bounded by
/// `store_timeout` and never retried.
pub struct TokenBucketLimiter<S, C = SystemClock> {
    store: Arc<S>,
    config: LimiterConfig,
    clock: C,
    locks: Option<KeyLocks>,
}

impl<S, C> std::fmt::Debug for TokenBucketLimiter<S, C>
where
    C: Clock,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("store", &"<bucket store>")
            .finish()
    }
}

impl<S> TokenBucketLimiter<S, SystemClock>
where
    S: BucketStore + 'static,
{
    /// Create a limiter backed by a shared store handle.
    pub fn new(store: Arc<S>, config: LimiterConfig) -> Self {
        let locks = config.serialize_per_key().then(KeyLocks::new);
        Self { store, config, clock: SystemClock, locks }
    }
}

impl<S, C> TokenBucketLimiter<S, C>
where
    S: BucketStore + 'static,
    C: Clock,
{
    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TokenBucketLimiter<S, C2> {
        TokenBucketLimiter { store: self.store, config: self.config, clock, locks: self.locks }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::TimedOut(timeout)),
        }
    }

    async fn cycle(&self, key: &str) -> Result<Decision, StoreError> {
        let record = self.bounded(self.store.fetch(key)).await?;
        // Read the clock after the fetch so the stamp reflects when the state was observed.
        let now = self.clock.now_millis();

        let mut bucket = match record {
            None => TokenBucket::full(&self.config, now),
            Some(record) => TokenBucket::from_record(&record).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "resetting malformed bucket record");
                TokenBucket::full(&self.config, now)
            }),
        };

        let decision = bucket.advance(&self.config, now);
        self.bounded(self.store.store(key, &bucket.to_record())).await?;

        if let Decision::Rejected { retry_after } = &decision {
            tracing::debug!(
                key = %key,
                tokens = bucket.tokens,
                ?retry_after,
                "rate limit exceeded"
            );
        }
        Ok(decision)
    }
}

#[async_trait]
impl<S, C> RateLimiter for TokenBucketLimiter<S, C>
where
    S: BucketStore + 'static,
    C: Clock + 'static,
{
    async fn try_acquire(&self, key: &str) -> Result<Decision, StoreError> {
        // Waiting on the key lock counts against the same budget as a store call.
        let _guard = match &self.locks {
            Some(locks) => Some(self.bounded(async { Ok(locks.lock(key).await) }).await?),
            None => None,
        };
        self.cycle(key).await
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.config.failure_policy()
    }
}
