//! Read-through memcache layer in front of the backend (spec.md §4.1).
//!
//! Grounded in the teacher's use of the `lru` crate: a process-local,
//! bounded, least-recently-used cache. A cached entry is
//! `Option<Entity>` rather than `Entity` so that a confirmed
//! "not found" can itself be cached without being mistaken for a miss
//! — that's what lets `get` distinguish "ask the backend" from "the
//! backend told us this key doesn't exist".

use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;

use super::{Entity, Key};

pub struct Memcache {
    inner: Mutex<LruCache<Key, Option<Entity>>>,
}

impl Memcache {
    pub fn new(capacity: usize) -> Memcache {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Memcache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// `None` means "not cached, ask the backend". `Some(None)` means
    /// "cached confirmation that the key does not exist".
    pub fn get(&self, key: &Key) -> Option<Option<Entity>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: Key, value: Option<Entity>) {
        self.inner.lock().unwrap().put(key, value);
    }

    pub fn invalidate(&self, key: &Key) {
        self.inner.lock().unwrap().pop(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_miss_from_cached_not_found() {
        let cache = Memcache::new(8);
        let key = Key::node("/a");
        assert_eq!(cache.get(&key), None);
        cache.put(key.clone(), None);
        assert_eq!(cache.get(&key), Some(None));
    }

    #[test]
    fn invalidate_forces_a_future_miss() {
        let cache = Memcache::new(8);
        let key = Key::node("/a");
        cache.put(key.clone(), Some(Entity::default()));
        cache.invalidate(&key);
        assert_eq!(cache.get(&key), None);
    }
}
