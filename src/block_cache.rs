//! Process-wide block cache (spec.md §4.2).
//!
//! Grounded in `scheduler::disk_read_scheduler::DiskReadScheduler`'s
//! `RwLock<HashMap<...>>`-guarded bookkeeping for a process-global
//! cache shared across every caller's thread.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::datastore::{Entity, Key};

struct Slot {
    entity: Entity,
    dirty: bool,
}

/// Unbounded by design (spec.md §4.2: "not bounded in this
/// specification"); the engine is responsible for calling
/// `evict_all` once a block's dirty state has been flushed or a
/// stream is closed, rather than relying on the cache itself to
/// reclaim memory.
#[derive(Default)]
pub struct BlockCache {
    slots: RwLock<HashMap<Key, Slot>>,
}

impl BlockCache {
    pub fn new() -> BlockCache {
        BlockCache::default()
    }

    pub fn get(&self, key: &Key) -> Option<Entity> {
        self.slots.read().unwrap().get(key).map(|s| s.entity.clone())
    }

    pub fn put(&self, key: Key, entity: Entity) {
        self.slots.write().unwrap().insert(
            key,
            Slot {
                entity,
                dirty: false,
            },
        );
    }

    pub fn mark_dirty(&self, key: &Key, dirty: bool) {
        if let Some(slot) = self.slots.write().unwrap().get_mut(key) {
            slot.dirty = dirty;
        }
    }

    pub fn is_dirty(&self, key: &Key) -> bool {
        self.slots
            .read()
            .unwrap()
            .get(key)
            .map(|s| s.dirty)
            .unwrap_or(false)
    }

    /// All currently-dirty entries, in the order a caller should write
    /// them (insertion order is not preserved; callers needing block
    /// offset order sort by key separately — block keys embed their
    /// index, so a lexicographic sort over `block.N` strings is not
    /// numerically stable above 9 blocks, so `BlockIO` sorts by the
    /// numeric index it already tracks rather than relying on this
    /// method's ordering).
    pub fn dirty_entries(&self, keys: &[Key]) -> Vec<(Key, Entity)> {
        let slots = self.slots.read().unwrap();
        keys.iter()
            .filter_map(|k| {
                slots
                    .get(k)
                    .filter(|s| s.dirty)
                    .map(|s| (k.clone(), s.entity.clone()))
            })
            .collect()
    }

    pub fn evict_all(&self, keys: &[Key]) {
        let mut slots = self.slots.write().unwrap();
        for key in keys {
            slots.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_and_dirty_tracking() {
        let cache = BlockCache::new();
        let key = Key::block(&Key::node("/a"), 0);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), Entity::default());
        assert!(cache.get(&key).is_some());
        assert!(!cache.is_dirty(&key));
        cache.mark_dirty(&key, true);
        assert!(cache.is_dirty(&key));
        assert_eq!(cache.dirty_entries(&[key.clone()]).len(), 1);
    }

    #[test]
    fn evict_all_drops_entries() {
        let cache = BlockCache::new();
        let key = Key::block(&Key::node("/a"), 0);
        cache.put(key.clone(), Entity::default());
        cache.evict_all(&[key.clone()]);
        assert!(cache.get(&key).is_none());
    }
}
