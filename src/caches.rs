//! Process-wide metadata caches.
//!
//! Caches here outlive any single context. Every refresh attempt ends with
//! [`reset_all`], successful or not, since the metadata they hold is mostly
//! needed while definitions are being processed.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::hash::Hash;
use std::sync::LazyLock;

/// A cache that can be emptied by [`reset_all`].
pub trait ResettableCache: Send + Sync {
    fn name(&self) -> &str;
    fn clear(&self);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent memoizing map.
pub struct MetadataCache<K, V> {
    name: &'static str,
    entries: DashMap<K, V>,
}

impl<K, V> MetadataCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(found) = self.entries.get(&key) {
            return found.clone();
        }
        let value = compute();
        self.entries.entry(key).or_insert(value).clone()
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }
}

impl<K, V> ResettableCache for MetadataCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

static REGISTERED: LazyLock<RwLock<Vec<&'static dyn ResettableCache>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

/// Adds a cache to the set cleared by [`reset_all`].
pub fn register(cache: &'static dyn ResettableCache) {
    let mut caches = REGISTERED.write();
    let already = caches
        .iter()
        .any(|c| {
            std::ptr::addr_eq(
                *c as *const dyn ResettableCache,
                cache as *const dyn ResettableCache,
            )
        });
    if !already {
        caches.push(cache);
    }
}

/// Clears the built-in caches and every registered one.
pub fn reset_all() {
    crate::environment::placeholder_cache().clear();
    let caches = REGISTERED.read();
    for cache in caches.iter() {
        tracing::trace!(cache = cache.name(), entries = cache.len(), "Clearing cache");
        cache.clear();
    }
}
