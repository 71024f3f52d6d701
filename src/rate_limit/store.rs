use crate::error::StoreError;
use crate::rate_limit::bucket::BucketRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Abstract storage interface for bucket records.
///
/// A thin key-value contract: no validation, no compare-and-swap. Implementations talk to
/// whatever holds the authoritative copy (process memory, Redis, ...). Callers wrap each call in
/// their own timeout; implementations should not retry.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Fetch the stored fields for `key`, or `None` if nothing was ever written.
    async fn fetch(&self, key: &str) -> Result<Option<BucketRecord>, StoreError>;

    /// Overwrite the stored fields for `key`. Last writer wins.
    async fn store(&self, key: &str, record: &BucketRecord) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> BucketStore for Arc<S>
where
    S: BucketStore + ?Sized,
{
    async fn fetch(&self, key: &str) -> Result<Option<BucketRecord>, StoreError> {
        (**self).fetch(key).await
    }

    async fn store(&self, key: &str, record: &BucketRecord) -> Result<(), StoreError> {
        (**self).store(key, record).await
    }
}

/// Simple in-memory bucket store.
///
/// Clones share the same map. Useful for tests and single-process deployments; buckets are never
/// evicted.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBucketStore {
    data: Arc<Mutex<HashMap<String, BucketRecord>>>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the record currently held for `key`.
    pub fn get(&self, key: &str) -> Option<BucketRecord> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    /// Put a record directly, bypassing the limiter (seeding, corrupting, skewing).
    pub fn insert(&self, key: impl Into<String>, record: BucketRecord) {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).insert(key.into(), record);
    }

    /// Number of keys with a bucket.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn fetch(&self, key: &str) -> Result<Option<BucketRecord>, StoreError> {
        Ok(self.get(key))
    }

    async fn store(&self, key: &str, record: &BucketRecord) -> Result<(), StoreError> {
        self.insert(key, record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_absent_key_is_none() {
        let store = InMemoryBucketStore::new();
        assert_eq!(store.fetch("10.0.0.1").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_overwrites_and_clones_share_state() {
        let store = InMemoryBucketStore::new();
        let other = store.clone();

        let first: BucketRecord = [("tokens", "9"), ("last", "1")].into_iter().collect();
        let second: BucketRecord = [("tokens", "8"), ("last", "2")].into_iter().collect();
        store.store("k", &first).await.unwrap();
        other.store("k", &second).await.unwrap();

        assert_eq!(store.fetch("k").await.unwrap(), Some(second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn arc_store_delegates() {
        let inner = InMemoryBucketStore::new();
        let shared: Arc<dyn BucketStore> = Arc::new(inner.clone());
        let record: BucketRecord = [("tokens", "1"), ("last", "1")].into_iter().collect();
        shared.store("k", &record).await.unwrap();
        assert_eq!(inner.get("k"), Some(record));
    }
}
