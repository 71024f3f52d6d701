//! In-process per-key serialization of check-and-update cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// Dead weak entries are swept once the map grows past this many keys since the last sweep.
const SWEEP_THRESHOLD: usize = 1024;

/// Registry of one async mutex per key, held only while some cycle needs it.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    inner: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    locks: HashMap<String, Weak<AsyncMutex<()>>>,
    sweep_at: usize,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key` within this process.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(key);
        lock.lock_owned().await
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = registry.locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        registry.locks.insert(key.to_string(), Arc::downgrade(&lock));

        if registry.locks.len() > registry.sweep_at.max(SWEEP_THRESHOLD) {
            registry.locks.retain(|_, weak| weak.strong_count() > 0);
            registry.sweep_at = registry.locks.len() * 2;
        }
        lock
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).locks.len()
    }
}
