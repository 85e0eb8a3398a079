//! Bounded LRU cache of merged idsets.
//!
//! Keyed by `{keys, condition, sort_id}`; hot repeated selects skip the
//! per-key merge. The owning index clears the cache on every mutation
//! that touches it, so entries never outlive the data they summarize.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use vellum_idset::IdSet;
use vellum_types::{CondType, Value};

use crate::keyentry::SortType;

/// Default capacity of one index's idset cache, in entries.
pub const DEFAULT_IDSET_CACHE_SIZE: usize = 1024;

/// Cache key: the looked-up keys, the condition, and the sort order the
/// result was bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdSetCacheKey {
    pub keys: Vec<Value>,
    pub cond: CondType,
    pub sort_id: SortType,
}

/// Thread-safe bounded LRU of merged idsets.
pub struct IdSetCache {
    inner: Mutex<LruCache<IdSetCacheKey, Arc<IdSet>>>,
}

impl std::fmt::Debug for IdSetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdSetCache")
            .field("len", &self.inner.lock().len())
            .finish()
    }
}

impl Default for IdSetCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_IDSET_CACHE_SIZE)
    }
}

impl IdSetCache {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &IdSetCacheKey) -> Option<Arc<IdSet>> {
        self.inner.lock().get(key).cloned()
    }

    pub fn put(&self, key: IdSetCacheKey, ids: Arc<IdSet>) {
        self.inner.lock().put(key, ids);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i64) -> IdSetCacheKey {
        IdSetCacheKey {
            keys: vec![Value::Int(v)],
            cond: CondType::Eq,
            sort_id: 0,
        }
    }

    #[test]
    fn test_hit_and_clear() {
        let cache = IdSetCache::with_capacity(4);
        cache.put(key(1), Arc::new(IdSet::from_vec(vec![1, 2])));
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());
        cache.clear();
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = IdSetCache::with_capacity(2);
        cache.put(key(1), Arc::new(IdSet::new()));
        cache.put(key(2), Arc::new(IdSet::new()));
        cache.put(key(3), Arc::new(IdSet::new()));
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(3)).is_some());
    }
}
