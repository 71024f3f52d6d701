//! Redis bucket store for `tollgate` (companion crate).
//! Bring your own connection; each bucket is a hash `{ tokens, last }` under `prefix + key`.
//!
//! Writes are a plain `HSET` (last writer wins). When a TTL is configured the `HSET` and a
//! `PEXPIRE` go out in one `MULTI`/`EXEC` pipeline so idle clients' buckets age out.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use std::collections::HashMap;
use std::time::Duration;
use tollgate::{BucketRecord, BucketStore, StoreError};

#[derive(Clone)]
pub struct RedisBucketStore<C = ConnectionManager> {
    prefix: String,
    ttl: Option<Duration>,
    conn: C,
}

impl<C> std::fmt::Debug for RedisBucketStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("conn", &"<redis connection>")
            .finish()
    }
}

impl RedisBucketStore<ConnectionManager> {
    /// Open a managed, auto-reconnecting connection to `url` (e.g. `redis://127.0.0.1:6379/`).
    ///
    /// Call once at startup and share the store; the connection is multiplexed.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(StoreError::unavailable)?;
        Ok(Self::new(conn))
    }
}

impl<C> RedisBucketStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Create a store over an existing connection. Keys are used verbatim, with no expiry.
    pub fn new(conn: C) -> Self {
        Self { prefix: String::new(), ttl: None, conn }
    }

    /// Namespace every key, e.g. `ratelimit:`.
    ///
    /// # Errors
    /// Returns `Err` if the prefix contains whitespace or control characters.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Result<Self, String> {
        self.prefix = validate_prefix(prefix.into())?;
        Ok(self)
    }

    /// Expire bucket records `ttl` after their last write. A zero TTL disables expiry.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.filter(|t| !t.is_zero());
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn validate_prefix(prefix: String) -> Result<String, String> {
    if prefix.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("prefix cannot contain whitespace or control characters".to_string());
    }
    Ok(prefix)
}

#[async_trait]
impl<C> BucketStore for RedisBucketStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, key: &str) -> Result<Option<BucketRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let fields: HashMap<String, String> =
            redis::cmd("HGETALL").arg(&key).query_async(&mut conn).await.map_err(|e| {
                tracing::warn!(target: "tollgate::redis", key = %key, error = %e, "HGETALL failed");
                StoreError::unavailable(e)
            })?;

        // Redis answers HGETALL on a missing key with an empty hash.
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(BucketRecord::from(fields)))
        }
    }

    async fn store(&self, key: &str, record: &BucketRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);

        let mut pipe = redis::pipe();
        pipe.atomic();
        let hset = pipe.cmd("HSET").arg(&key);
        for (field, value) in record.iter() {
            hset.arg(field).arg(value);
        }
        hset.ignore();
        if let Some(ttl) = self.ttl {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            pipe.cmd("PEXPIRE").arg(&key).arg(millis).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(|e| {
            tracing::warn!(target: "tollgate::redis", key = %key, error = %e, "HSET failed");
            StoreError::unavailable(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_validation() {
        assert_eq!(validate_prefix("ratelimit:".into()), Ok("ratelimit:".to_string()));
        assert_eq!(validate_prefix(String::new()), Ok(String::new()));
        assert!(validate_prefix("rate limit:".into()).is_err());
        assert!(validate_prefix("rl\n".into()).is_err());
    }
}
