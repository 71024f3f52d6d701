//! Limiter configuration and the environment-driven startup settings.
//!
//! Everything here is read once at startup and immutable afterwards. `refill_rate` is derived
//! from `capacity / window` when the config is built, never per request.

use crate::error::ConfigError;
use crate::rate_limit::FailurePolicy;
use std::time::Duration;

const DEFAULT_CAPACITY: u32 = 10;
const DEFAULT_WINDOW_MILLIS: u64 = 60_000;
const DEFAULT_STORE_TIMEOUT_MILLIS: u64 = 250;
const DEFAULT_STORE_HOST: &str = "127.0.0.1";
const DEFAULT_STORE_PORT: u16 = 6379;

/// Validated token bucket configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    capacity: u32,
    window: Duration,
    refill_rate_per_ms: f64,
    store_timeout: Duration,
    failure_policy: FailurePolicy,
    serialize_per_key: bool,
}

impl LimiterConfig {
    /// Construct a builder with defaults (10 requests per 60s, 250ms store timeout, fail-open).
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::new()
    }

    /// Create a config with validation and default store/failure settings.
    pub fn new(capacity: u32, window: Duration) -> Result<Self, ConfigError> {
        Self::builder().capacity(capacity).window(window).build()
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Time to refill an empty bucket to capacity.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Tokens added per elapsed millisecond.
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_rate_per_ms
    }

    /// Upper bound on each individual store call.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Whether check-and-update cycles for the same key are serialized within this process.
    pub fn serialize_per_key(&self) -> bool {
        self.serialize_per_key
    }

    // Multiply before dividing so whole-number cases (30s of a 60s window) stay exact.
    pub(crate) fn tokens_for_elapsed(&self, elapsed_ms: u64) -> f64 {
        elapsed_ms as f64 * f64::from(self.capacity) / self.window.as_millis() as f64
    }

    pub(crate) fn millis_for_tokens(&self, tokens: f64) -> f64 {
        tokens * self.window.as_millis() as f64 / f64::from(self.capacity)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        let window = Duration::from_millis(DEFAULT_WINDOW_MILLIS);
        Self {
            capacity: DEFAULT_CAPACITY,
            window,
            refill_rate_per_ms: f64::from(DEFAULT_CAPACITY) / DEFAULT_WINDOW_MILLIS as f64,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MILLIS),
            failure_policy: FailurePolicy::default(),
            serialize_per_key: false,
        }
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone)]
pub struct LimiterConfigBuilder {
    capacity: u32,
    window: Duration,
    store_timeout: Duration,
    failure_policy: FailurePolicy,
    serialize_per_key: bool,
}

impl LimiterConfigBuilder {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: Duration::from_millis(DEFAULT_WINDOW_MILLIS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MILLIS),
            failure_policy: FailurePolicy::default(),
            serialize_per_key: false,
        }
    }

    /// Set the bucket capacity. Must be > 0.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the refill window. Must be at least 1ms.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the per-call store timeout. Must be > 0.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Serialize same-key cycles behind an in-process async lock.
    ///
    /// Only removes lost updates between requests handled by this process.
    pub fn serialize_per_key(mut self, enabled: bool) -> Self {
        self.serialize_per_key = enabled;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity(self.capacity));
        }
        let window_ms = self.window.as_millis();
        if window_ms == 0 {
            return Err(ConfigError::InvalidWindow(self.window));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidStoreTimeout(self.store_timeout));
        }
        Ok(LimiterConfig {
            capacity: self.capacity,
            window: self.window,
            refill_rate_per_ms: f64::from(self.capacity) / window_ms as f64,
            store_timeout: self.store_timeout,
            failure_policy: self.failure_policy,
            serialize_per_key: self.serialize_per_key,
        })
    }
}

impl Default for LimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide startup settings, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub store_host: String,
    pub store_port: u16,
    /// Prefix prepended to every client key in the store.
    pub key_prefix: String,
    /// Expiry applied to bucket records on every write; `None` keeps them forever.
    pub bucket_ttl: Option<Duration>,
    /// Header carrying the client identity; `None` keys on the peer IP.
    pub key_header: Option<String>,
    pub limiter: LimiterConfig,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through an arbitrary lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store_host = get("REDIS_HOST").unwrap_or_else(|| DEFAULT_STORE_HOST.to_string());
        let store_port = parse_var(&get, "REDIS_PORT")?.unwrap_or(DEFAULT_STORE_PORT);
        let window_ms: u64 =
            parse_var(&get, "RATE_LIMIT_WINDOW_MS")?.unwrap_or(DEFAULT_WINDOW_MILLIS);
        let capacity: u32 = parse_var(&get, "RATE_LIMIT_MAX_REQUESTS")?.unwrap_or(DEFAULT_CAPACITY);
        let timeout_ms: u64 = parse_var(&get, "RATE_LIMIT_STORE_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_STORE_TIMEOUT_MILLIS);
        let serialize_per_key: bool =
            parse_var(&get, "RATE_LIMIT_SERIALIZE_PER_KEY")?.unwrap_or(false);
        let bucket_ttl = parse_var::<u64, _>(&get, "RATE_LIMIT_BUCKET_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let failure_policy = match get("RATE_LIMIT_FAILURE_POLICY") {
            None => FailurePolicy::default(),
            Some(raw) => raw.parse().map_err(|reason: String| ConfigError::Invalid {
                var: "RATE_LIMIT_FAILURE_POLICY",
                value: raw.clone(),
                reason,
            })?,
        };

        let limiter = LimiterConfig::builder()
            .capacity(capacity)
            .window(Duration::from_millis(window_ms))
            .store_timeout(Duration::from_millis(timeout_ms))
            .failure_policy(failure_policy)
            .serialize_per_key(serialize_per_key)
            .build()?;

        Ok(Self {
            store_host,
            store_port,
            key_prefix: get("RATE_LIMIT_KEY_PREFIX").unwrap_or_default(),
            bucket_ttl,
            key_header: get("RATE_LIMIT_KEY_HEADER"),
            limiter,
        })
    }

    /// Connection URL for the bucket store.
    pub fn store_url(&self) -> String {
        format!("redis://{}:{}/", self.store_host, self.store_port)
    }
}

fn parse_var<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
