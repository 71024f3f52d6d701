//! Token bucket state and its stored record form.

use crate::config::LimiterConfig;
use crate::error::MalformedBucketRecord;
use crate::rate_limit::Decision;
use std::collections::HashMap;
use std::time::Duration;

/// Record field holding the token count as text.
pub const TOKENS_FIELD: &str = "tokens";
/// Record field holding the last refill time in epoch milliseconds.
pub const LAST_FIELD: &str = "last";

/// Per-key bucket state.
///
/// Invariant after [`advance`](Self::advance): `0 <= tokens <= capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_refill_ms: u64,
}

impl TokenBucket {
    /// A bucket seen for the first time: full, stamped `now`.
    pub fn full(config: &LimiterConfig, now_ms: u64) -> Self {
        Self { tokens: f64::from(config.capacity()), last_refill_ms: now_ms }
    }

    /// Refill for the time since `last_refill_ms`, then try to take one token.
    ///
    /// The timestamp moves to `now_ms` whatever the outcome. A stored timestamp ahead of
    /// `now_ms` (clock skew) counts as zero elapsed time.
    pub fn advance(&mut self, config: &LimiterConfig, now_ms: u64) -> Decision {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        let capacity = f64::from(config.capacity());
        self.tokens = (self.tokens + config.tokens_for_elapsed(elapsed_ms)).min(capacity);
        self.last_refill_ms = now_ms;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Admitted { remaining: Some(self.remaining()) }
        } else {
            Decision::Rejected { retry_after: self.retry_after(config) }
        }
    }

    /// Whole tokens available.
    pub fn remaining(&self) -> u32 {
        self.tokens.max(0.0).floor() as u32
    }

    /// Time until the bucket holds one whole token, rounded up to the millisecond.
    pub fn retry_after(&self, config: &LimiterConfig) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::from_millis(config.millis_for_tokens(missing).ceil() as u64)
    }

    /// Encode for the store: `tokens` as float text, `last` as integer text.
    pub fn to_record(&self) -> BucketRecord {
        let mut record = BucketRecord::new();
        record.insert(TOKENS_FIELD, self.tokens.to_string());
        record.insert(LAST_FIELD, self.last_refill_ms.to_string());
        record
    }

    /// Decode a stored record. Missing, unparsable, negative, or non-finite fields are malformed.
    pub fn from_record(record: &BucketRecord) -> Result<Self, MalformedBucketRecord> {
        let raw_tokens = record.get(TOKENS_FIELD);
        let tokens = raw_tokens
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| MalformedBucketRecord {
                field: TOKENS_FIELD,
                value: raw_tokens.map(str::to_string),
            })?;

        let raw_last = record.get(LAST_FIELD);
        let last_refill_ms = raw_last
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| MalformedBucketRecord {
                field: LAST_FIELD,
                value: raw_last.map(str::to_string),
            })?;

        Ok(Self { tokens, last_refill_ms })
    }
}

/// Raw field map as held by a [`BucketStore`](crate::BucketStore).
///
/// Stores persist and return this verbatim; only [`TokenBucket::from_record`] interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketRecord {
    fields: HashMap<String, String>,
}

impl BucketRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate `(field, value)` pairs, e.g. to build an `HSET`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<HashMap<String, String>> for BucketRecord {
    fn from(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BucketRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}
