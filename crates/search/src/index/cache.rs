//! Entity cache used by [`Index::fetch`](crate::Index::fetch).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

type CachedValue = Arc<dyn Any + Send + Sync>;

/// A bounded cache of entities keyed by `"<type>-<id>"`.
///
/// Entries expire a fixed time after insertion. Capacity is enforced by the
/// cache's own eviction policy.
#[derive(Clone)]
pub struct EntityCache {
    entries: Cache<String, CachedValue>,
    ttl: Duration,
    capacity: u64,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("entries", &self.entries.entry_count())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EntityCache {
    /// Creates a cache holding up to `capacity` entries for `ttl` each.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = capacity as u64;
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self {
            entries,
            ttl,
            capacity,
        }
    }

    /// Builds the key of an entity.
    pub fn key(type_name: &str, id: &str) -> String {
        format!("{}-{}", type_name, id)
    }

    /// Returns a live entry of type `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// Stores `value` under `key`.
    pub fn put<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Drops the entry under `key`.
    pub fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Drops all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Returns the number of live entries after pending evictions are applied.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
