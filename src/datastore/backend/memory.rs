//! In-process `Backend`: the default, and what the test suite runs
//! against. Grounded in `disk_store::meta_store::MetaStore`
//! (`Arc<RwLock<HashMap<...>>>`) for its concurrency shape, and in
//! `disk_store::noop_storage` for the idea that a trivial backend
//! needs no external service at all.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::datastore::{Entity, Key, Tx};
use crate::error::Result;

use super::Backend;

#[derive(Default, Clone)]
pub struct MemoryBackend {
    entities: Arc<RwLock<HashMap<Key, Entity>>>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &Key) -> Result<Option<Entity>> {
        Ok(self.entities.read().unwrap().get(key).cloned())
    }

    fn get_many(&self, keys: &[Key]) -> Result<HashMap<Key, Entity>> {
        let store = self.entities.read().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| store.get(k).map(|e| (k.clone(), e.clone())))
            .collect())
    }

    fn put(&self, key: &Key, entity: Entity) -> Result<()> {
        self.entities.write().unwrap().insert(key.clone(), entity);
        Ok(())
    }

    fn put_many(&self, entities: &[(Key, Entity)]) -> Result<()> {
        let mut store = self.entities.write().unwrap();
        for (key, entity) in entities {
            store.insert(key.clone(), entity.clone());
        }
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<()> {
        self.entities.write().unwrap().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[Key]) -> Result<()> {
        let mut store = self.entities.write().unwrap();
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }

    fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        Ok(Box::new(MemoryTx {
            entities: self.entities.clone(),
            puts: Vec::new(),
            deletes: Vec::new(),
        }))
    }
}

/// Stages puts/deletes; nothing reaches the shared map until `commit`,
/// which is all the atomicity this backend needs to provide since it
/// has no partial-failure modes of its own.
struct MemoryTx {
    entities: Arc<RwLock<HashMap<Key, Entity>>>,
    puts: Vec<(Key, Entity)>,
    deletes: Vec<Key>,
}

impl Tx for MemoryTx {
    fn put(&mut self, key: &Key, entity: Entity) -> Result<()> {
        self.puts.push((key.clone(), entity));
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.deletes.push(key.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut store = self.entities.write().unwrap();
        for key in self.deletes {
            store.remove(&key);
        }
        for (key, entity) in self.puts {
            store.insert(key, entity);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Property;

    #[test]
    fn put_then_get_round_trips() {
        let backend = MemoryBackend::new();
        let key = Key::node("/a");
        let mut entity = Entity::default();
        entity.set("filetype", Property::Str("FILE".to_string()));
        backend.put(&key, entity.clone()).unwrap();
        assert_eq!(backend.get(&key).unwrap(), Some(entity));
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let backend = MemoryBackend::new();
        let key = Key::node("/a");
        backend.put(&key, Entity::default()).unwrap();
        backend.delete(&key).unwrap();
        assert_eq!(backend.get(&key).unwrap(), None);
    }

    #[test]
    fn transaction_commit_is_visible_after_commit_only() {
        let backend = MemoryBackend::new();
        let key = Key::node("/a");
        let mut tx = backend.begin_tx().unwrap();
        tx.put(&key, Entity::default()).unwrap();
        assert_eq!(backend.get(&key).unwrap(), None);
        tx.commit().unwrap();
        assert_eq!(backend.get(&key).unwrap(), Some(Entity::default()));
    }
}
