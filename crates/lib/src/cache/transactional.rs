use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use sqlmapper_helpers::IndexMap;

use super::{CacheKey, CachedValue, SharedCacheHandle};

/// Per-session staging buffer over one shared cache: puts are invisible to
/// other sessions until commit, rollback discards them.
pub struct TransactionalCache {
    delegate: SharedCacheHandle,
    clear_on_commit: bool,
    staged: IndexMap<CacheKey, CachedValue>,
    missed: AHashSet<CacheKey>,
}

impl TransactionalCache {
    fn new(delegate: SharedCacheHandle) -> Self {
        TransactionalCache {
            delegate,
            clear_on_commit: false,
            staged: IndexMap::default(),
            missed: AHashSet::new(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<CachedValue> {
        let value = self.delegate.get(key);
        if value.is_none() {
            self.missed.insert(key.clone());
        }
        if self.clear_on_commit { None } else { value }
    }

    pub fn put(&mut self, key: CacheKey, value: CachedValue) {
        self.staged.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.clear_on_commit = true;
        self.staged.clear();
    }

    pub fn commit(&mut self) {
        if self.clear_on_commit {
            self.delegate.clear();
        }
        for (key, value) in self.staged.drain(..) {
            self.missed.remove(&key);
            self.delegate.put(key, value);
        }
        for key in self.missed.drain() {
            self.delegate.release(&key);
        }
        self.clear_on_commit = false;
    }

    pub fn rollback(&mut self) {
        for key in self.missed.drain() {
            self.delegate.release(&key);
        }
        self.staged.clear();
        self.clear_on_commit = false;
    }
}

/// Routes staged operations to one `TransactionalCache` per shared cache
/// touched by the session.
#[derive(Default)]
pub struct TransactionalCacheManager {
    caches: AHashMap<usize, TransactionalCache>,
}

impl TransactionalCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, cache: &SharedCacheHandle) -> &mut TransactionalCache {
        self.caches
            .entry(Arc::as_ptr(cache) as usize)
            .or_insert_with(|| TransactionalCache::new(cache.clone()))
    }

    pub fn get(&mut self, cache: &SharedCacheHandle, key: &CacheKey) -> Option<CachedValue> {
        self.entry(cache).get(key)
    }

    pub fn put(&mut self, cache: &SharedCacheHandle, key: CacheKey, value: CachedValue) {
        self.entry(cache).put(key, value);
    }

    pub fn clear(&mut self, cache: &SharedCacheHandle) {
        self.entry(cache).clear();
    }

    pub fn commit(&mut self) {
        for cache in self.caches.values_mut() {
            cache.commit();
        }
    }

    pub fn rollback(&mut self) {
        for cache in self.caches.values_mut() {
            cache.rollback();
        }
    }
}
