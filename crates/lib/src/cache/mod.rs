pub mod key;
pub mod transactional;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use enum_dispatch::enum_dispatch;
use smol_str::SmolStr;
use sqlmapper_helpers::IndexSet;
use sqlmapper_lib_core::value::Value;

pub use key::CacheKey;

use crate::mapping::{CacheConfig, Eviction};

/// A cached result list. Read-only caches hand the same list to every
/// session; read-write caches deep-copy on retrieval.
pub type CachedValue = Arc<Vec<Value>>;

/// The single capability set every cache layer composes over.
#[enum_dispatch]
pub trait CacheBehavior {
    fn get(&self, key: &CacheKey) -> Option<CachedValue>;
    fn put(&mut self, key: CacheKey, value: CachedValue);
    fn remove(&mut self, key: &CacheKey);
    fn clear(&mut self);
    fn size(&self) -> usize;
}

/// The decorator chain below the synchronization wrapper, composed in
/// order: storage, then eviction, then the optional timed clear.
#[enum_dispatch(CacheBehavior)]
pub enum CacheImpl {
    Perpetual(PerpetualCache),
    Lru(LruCache),
    Fifo(FifoCache),
    Scheduled(ScheduledCache),
    WeakRefs(WeakCache),
}

#[derive(Default)]
pub struct PerpetualCache {
    entries: AHashMap<CacheKey, CachedValue>,
}

impl PerpetualCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBehavior for PerpetualCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: CacheKey, value: CachedValue) {
        self.entries.insert(key, value);
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn size(&self) -> usize {
        self.entries.len()
    }
}

/// Bounded access-ordered eviction: the least-recently-read entry goes
/// first, ties broken by insertion order. Recency tracking lives behind a
/// mutex so lookups stay shared-lock reads at the synchronization layer.
pub struct LruCache {
    delegate: Box<CacheImpl>,
    capacity: usize,
    order: Mutex<IndexSet<CacheKey>>,
}

impl LruCache {
    pub fn new(delegate: CacheImpl, capacity: usize) -> Self {
        LruCache {
            delegate: Box::new(delegate),
            capacity: capacity.max(1),
            order: Mutex::new(IndexSet::default()),
        }
    }

    fn touch(&self, key: &CacheKey) {
        let mut order = self.order.lock().unwrap();
        order.shift_remove(key);
        order.insert(key.clone());
    }
}

impl CacheBehavior for LruCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let hit = self.delegate.get(key);
        if hit.is_some() {
            self.touch(key);
        }
        hit
    }

    fn put(&mut self, key: CacheKey, value: CachedValue) {
        self.delegate.put(key.clone(), value);
        let evicted = {
            let mut order = self.order.lock().unwrap();
            order.shift_remove(&key);
            order.insert(key);
            let mut evicted = Vec::new();
            while order.len() > self.capacity {
                if let Some(oldest) = order.shift_remove_index(0) {
                    evicted.push(oldest);
                } else {
                    break;
                }
            }
            evicted
        };
        for key in &evicted {
            self.delegate.remove(key);
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        self.order.lock().unwrap().shift_remove(key);
        self.delegate.remove(key);
    }

    fn clear(&mut self) {
        self.order.lock().unwrap().clear();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}

/// Bounded insertion-ordered eviction.
pub struct FifoCache {
    delegate: Box<CacheImpl>,
    capacity: usize,
    queue: VecDeque<CacheKey>,
}

impl FifoCache {
    pub fn new(delegate: CacheImpl, capacity: usize) -> Self {
        FifoCache {
            delegate: Box::new(delegate),
            capacity: capacity.max(1),
            queue: VecDeque::new(),
        }
    }
}

impl CacheBehavior for FifoCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.delegate.get(key)
    }

    fn put(&mut self, key: CacheKey, value: CachedValue) {
        if !self.queue.contains(&key) {
            self.queue.push_back(key.clone());
        }
        self.delegate.put(key, value);
        while self.queue.len() > self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                self.delegate.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        self.queue.retain(|queued| queued != key);
        self.delegate.remove(key);
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}

/// Timed clear decorator: once the flush interval elapses, the cache reads
/// as empty; the actual clear happens on the next mutating call.
pub struct ScheduledCache {
    delegate: Box<CacheImpl>,
    interval: Duration,
    last_clear: Mutex<Instant>,
}

impl ScheduledCache {
    pub fn new(delegate: CacheImpl, interval_ms: u64) -> Self {
        ScheduledCache {
            delegate: Box::new(delegate),
            interval: Duration::from_millis(interval_ms),
            last_clear: Mutex::new(Instant::now()),
        }
    }

    fn expired(&self) -> bool {
        self.last_clear.lock().unwrap().elapsed() >= self.interval
    }
}

impl CacheBehavior for ScheduledCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        if self.expired() {
            return None;
        }
        self.delegate.get(key)
    }

    fn put(&mut self, key: CacheKey, value: CachedValue) {
        if self.expired() {
            self.delegate.clear();
            *self.last_clear.lock().unwrap() = Instant::now();
        }
        self.delegate.put(key, value);
    }

    fn remove(&mut self, key: &CacheKey) {
        self.delegate.remove(key);
    }

    fn clear(&mut self) {
        self.delegate.clear();
        *self.last_clear.lock().unwrap() = Instant::now();
    }

    fn size(&self) -> usize {
        if self.expired() { 0 } else { self.delegate.size() }
    }
}

/// Weak-reference eviction: entries are held weakly, with hard references
/// kept only for the most recent `capacity` retrievals. Once an entry's
/// last hard reference drops, lookup treats it as absent.
pub struct WeakCache {
    entries: AHashMap<CacheKey, Weak<Vec<Value>>>,
    hard: Mutex<VecDeque<CachedValue>>,
    capacity: usize,
}

impl WeakCache {
    pub fn new(capacity: usize) -> Self {
        WeakCache {
            entries: AHashMap::new(),
            hard: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn retain_hard(&self, value: CachedValue) {
        let mut hard = self.hard.lock().unwrap();
        hard.push_back(value);
        while hard.len() > self.capacity {
            hard.pop_front();
        }
    }
}

impl CacheBehavior for WeakCache {
    fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let value = self.entries.get(key)?.upgrade()?;
        self.retain_hard(value.clone());
        Some(value)
    }

    fn put(&mut self, key: CacheKey, value: CachedValue) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.entries.insert(key, Arc::downgrade(&value));
        self.retain_hard(value);
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.hard.lock().unwrap().clear();
    }

    fn size(&self) -> usize {
        self.entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// The outermost, mandatory synchronization wrapper over a namespace
/// cache. Reads take the shared lock, writes the exclusive one; the
/// blocking option parks concurrent readers of a missing key until the
/// session that claimed the miss publishes a value (or releases on
/// rollback).
pub struct SharedCache {
    id: SmolStr,
    read_only: bool,
    blocking: bool,
    inner: RwLock<CacheImpl>,
    inflight: Mutex<AHashSet<CacheKey>>,
    available: Condvar,
}

pub type SharedCacheHandle = Arc<SharedCache>;

impl SharedCache {
    pub fn build(namespace: &str, config: &CacheConfig) -> SharedCacheHandle {
        let chain = match config.eviction {
            Eviction::Lru => CacheImpl::Lru(LruCache::new(
                CacheImpl::Perpetual(PerpetualCache::new()),
                config.size,
            )),
            Eviction::Fifo => CacheImpl::Fifo(FifoCache::new(
                CacheImpl::Perpetual(PerpetualCache::new()),
                config.size,
            )),
            Eviction::Weak => CacheImpl::WeakRefs(WeakCache::new(config.size)),
        };
        let chain = match config.flush_interval_ms {
            Some(interval) => CacheImpl::Scheduled(ScheduledCache::new(chain, interval)),
            None => chain,
        };
        Arc::new(SharedCache {
            id: SmolStr::new(namespace),
            read_only: config.read_only,
            blocking: config.blocking,
            inner: RwLock::new(chain),
            inflight: Mutex::new(AHashSet::new()),
            available: Condvar::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        if !self.blocking {
            return self.inner.read().unwrap().get(key);
        }
        let mut inflight = self.inflight.lock().unwrap();
        loop {
            if let Some(value) = self.inner.read().unwrap().get(key) {
                return Some(value);
            }
            if !inflight.contains(key) {
                // This caller claims the miss and must put or release.
                inflight.insert(key.clone());
                return None;
            }
            inflight = self.available.wait(inflight).unwrap();
        }
    }

    pub fn put(&self, key: CacheKey, value: CachedValue) {
        self.inner.write().unwrap().put(key.clone(), value);
        self.release(&key);
    }

    /// Drop a blocking claim without publishing a value.
    pub fn release(&self, key: &CacheKey) {
        if !self.blocking {
            return;
        }
        let mut inflight = self.inflight.lock().unwrap();
        if inflight.remove(key) {
            self.available.notify_all();
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        self.inner.write().unwrap().remove(key);
        self.release(key);
    }

    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }

    pub fn size(&self) -> usize {
        self.inner.read().unwrap().size()
    }
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("blocking", &self.blocking)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn key(n: i64) -> CacheKey {
        let mut key = CacheKey::new();
        key.update_int(n);
        key
    }

    fn value(n: i64) -> CachedValue {
        Arc::new(vec![Value::Int(n)])
    }

    #[test]
    fn lru_evicts_the_least_recently_read_entry() {
        let mut cache = LruCache::new(CacheImpl::Perpetual(PerpetualCache::new()), 1024);
        for n in 0..1024 {
            cache.put(key(n), value(n));
        }
        // Touch everything except key 1, making it the oldest untouched.
        for n in (0..1024).filter(|&n| n != 1) {
            assert!(cache.get(&key(n)).is_some());
        }
        cache.put(key(9999), value(9999));

        assert_eq!(cache.size(), 1024);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(0)).is_some());
        assert!(cache.get(&key(9999)).is_some());
    }

    #[test]
    fn fifo_evicts_in_insertion_order() {
        let mut cache = FifoCache::new(CacheImpl::Perpetual(PerpetualCache::new()), 2);
        cache.put(key(1), value(1));
        cache.put(key(2), value(2));
        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), value(3));
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn scheduled_cache_reads_empty_after_the_interval() {
        let mut cache = ScheduledCache::new(CacheImpl::Perpetual(PerpetualCache::new()), 0);
        cache.put(key(1), value(1));
        assert!(cache.get(&key(1)).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn weak_cache_forgets_entries_without_hard_references() {
        let mut cache = WeakCache::new(1);
        cache.put(key(1), value(1));
        cache.put(key(2), value(2));
        // Capacity one: the hard queue only pins key 2 now.
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn shared_cache_reads_and_writes() {
        let cache = SharedCache::build("app", &CacheConfig::default());
        cache.put(key(1), value(1));
        assert_eq!(cache.get(&key(1)), Some(value(1)));
        cache.remove(&key(1));
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn blocking_cache_claims_a_miss_and_releases_on_put() {
        let config = CacheConfig {
            blocking: true,
            ..Default::default()
        };
        let cache = SharedCache::build("app", &config);
        assert!(cache.get(&key(1)).is_none());

        let contender = cache.clone();
        let handle = std::thread::spawn(move || contender.get(&key(1)));
        cache.put(key(1), value(1));
        assert_eq!(handle.join().unwrap(), Some(value(1)));
    }
}
