//! A keyed cache whose entries are mutated under per-key locks.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use crate::error::{FacetreeError, Result};

#[derive(Debug, Default)]
struct KeyLock {
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

type LockMap = Mutex<AHashMap<String, Arc<KeyLock>>>;

/// Exclusive hold on one key of a [`LockableCache`], released on drop.
pub struct KeyGuard<'a> {
    key: String,
    lock: Arc<KeyLock>,
    locks: &'a LockMap,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for KeyGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        *self.lock.holder.lock() = None;
        self.lock.released.notify_one();

        // Handles are only cloned under the map lock: with just the map and
        // this guard left, no thread waits on the key.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&self.lock) == 2 && self.lock.holder.lock().is_none() {
            locks.remove(&self.key);
        }
    }
}

/// Shared map from a key to a value, with one lock per key.
///
/// Reads never lock a key. Writers lock the key they mutate, so unrelated
/// keys are computed concurrently. Locking a key already held by the current
/// thread fails with [`FacetreeError::CyclicDependency`] instead of
/// deadlocking.
pub struct LockableCache<V> {
    entries: RwLock<AHashMap<String, Arc<V>>>,
    locks: LockMap,
    lock_timeout: Duration,
}

impl<V> fmt::Debug for LockableCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockableCache")
            .field("entries", &self.entries.read().len())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl<V> LockableCache<V> {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            locks: Mutex::new(AHashMap::new()),
            lock_timeout,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.read().get(key).cloned()
    }

    /// Store `value` under `key`, returning the replaced entry.
    pub fn insert<K: Into<String>>(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.entries.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<(String, Arc<V>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Acquire the lock of `key`, waiting at most the cache's lock timeout.
    pub fn lock(&self, key: &str) -> Result<KeyGuard<'_>> {
        let lock = Arc::clone(self.locks.lock().entry(key.to_string()).or_default());
        let me = thread::current().id();
        let deadline = Instant::now() + self.lock_timeout;
        {
            let mut holder = lock.holder.lock();
            loop {
                match *holder {
                    None => break,
                    Some(owner) if owner == me => {
                        return Err(FacetreeError::cyclic(format!(
                            "lock on '{key}' requested again by its holder"
                        )));
                    }
                    Some(_) => {
                        if lock.released.wait_until(&mut holder, deadline).timed_out()
                            && holder.is_some()
                        {
                            return Err(FacetreeError::timeout(format!(
                                "lock on '{key}' not acquired within {:?}",
                                self.lock_timeout
                            )));
                        }
                    }
                }
            }
            *holder = Some(me);
        }
        debug!(key, "key locked");
        Ok(KeyGuard {
            key: key.to_string(),
            lock,
            locks: &self.locks,
        })
    }

    /// Whether some thread holds the lock of `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|lock| lock.holder.lock().is_some())
    }

    /// Number of keys currently locked or waited on.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    #[test]
    fn test_relock_by_holder_is_cyclic() {
        let cache: LockableCache<u32> = LockableCache::new(Duration::from_secs(1));
        let guard = cache.lock("sales").unwrap();
        assert!(cache.is_locked("sales"));
        let err = cache.lock("sales").unwrap_err();
        assert!(matches!(err, FacetreeError::CyclicDependency(_)));

        // Other keys stay available to the holder.
        let other = cache.lock("stores").unwrap();
        drop(other);
        drop(guard);
        assert!(!cache.is_locked("sales"));
        assert!(cache.lock("sales").is_ok());
    }

    #[test]
    fn test_lock_waits_for_release() {
        let cache = Arc::new(LockableCache::<u32>::new(Duration::from_secs(5)));
        let barrier = Arc::new(Barrier::new(2));
        let guard = cache.lock("sales").unwrap();

        let handle = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let _guard = cache.lock("sales").unwrap();
                cache.insert("sales", Arc::new(2));
            })
        };
        barrier.wait();
        cache.insert("sales", Arc::new(1));
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        handle.join().unwrap();
        assert_eq!(*cache.get("sales").unwrap(), 2);
    }

    #[test]
    fn test_lock_times_out() {
        let cache = Arc::new(LockableCache::<u32>::new(Duration::from_millis(30)));
        let _guard = cache.lock("sales").unwrap();
        let other = Arc::clone(&cache);
        let err = thread::spawn(move || other.lock("sales").map(|_| ()))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, FacetreeError::Timeout(_)));
    }

    #[test]
    fn test_released_locks_are_pruned() {
        let cache = Arc::new(LockableCache::<u32>::new(Duration::from_secs(5)));
        for i in 0..100 {
            let _guard = cache.lock(&format!("domain-{i}")).unwrap();
        }
        assert_eq!(cache.lock_count(), 0);

        // A waiter keeps the entry alive until it releases the key too.
        let guard = cache.lock("sales").unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let handle = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let _guard = cache.lock("sales").unwrap();
                thread::sleep(Duration::from_millis(20));
            })
        };
        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        handle.join().unwrap();
        assert_eq!(cache.lock_count(), 0);
        assert!(!cache.is_locked("sales"));
    }
}
