#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate::{BucketRecord, BucketStore, InMemoryBucketStore, StoreError};

/// In-memory store with switchable outages and call counters.
#[derive(Debug, Default, Clone)]
pub struct FlakyStore {
    pub inner: InMemoryBucketStore,
    fail_fetch: Arc<AtomicBool>,
    fail_store: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
    stores: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketStore for FlakyStore {
    async fn fetch(&self, key: &str) -> Result<Option<BucketRecord>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        self.inner.fetch(key).await
    }

    async fn store(&self, key: &str, record: &BucketRecord) -> Result<(), StoreError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection reset by peer"));
        }
        self.inner.store(key, record).await
    }
}

/// Store that panics on fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanickingStore;

#[async_trait]
impl BucketStore for PanickingStore {
    async fn fetch(&self, _key: &str) -> Result<Option<BucketRecord>, StoreError> {
        panic!("store driver bug");
    }

    async fn store(&self, _key: &str, _record: &BucketRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store with network latency.
///
/// `fetch` snapshots the record *before* sleeping, so concurrent callers all observe the state
/// from before any of them writes back, like a round trip to a remote store.
#[derive(Debug, Clone)]
pub struct SlowStore {
    pub inner: InMemoryBucketStore,
    fetch_delay: Duration,
    store_delay: Duration,
}

impl SlowStore {
    pub fn new(fetch_delay: Duration, store_delay: Duration) -> Self {
        Self { inner: InMemoryBucketStore::new(), fetch_delay, store_delay }
    }
}

#[async_trait]
impl BucketStore for SlowStore {
    async fn fetch(&self, key: &str) -> Result<Option<BucketRecord>, StoreError> {
        let snapshot = self.inner.get(key);
        tokio::time::sleep(self.fetch_delay).await;
        Ok(snapshot)
    }

    async fn store(&self, key: &str, record: &BucketRecord) -> Result<(), StoreError> {
        tokio::time::sleep(self.store_delay).await;
        self.inner.store(key, record).await
    }
}
