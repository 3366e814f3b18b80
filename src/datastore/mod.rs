//! DatastoreClient: the thin façade over the backing datastore, plus a
//! read-through memcache (spec.md §4.1).

pub mod backend;
pub mod memcache;

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::error::{FsError, IoError, Result};
use backend::Backend;
use memcache::Memcache;

/// Per-operation ceilings the platform-style datastore imposes
/// (spec.md §4.1). A real backend may be stricter; the client never
/// assumes it can be looser.
pub const MAX_BULK_PUT_BYTES: usize = 1024 * 1024;
pub const MAX_BULK_PUT_ENTITIES: usize = 500;
pub const MAX_BULK_GET_ENTITIES: usize = 1000;

/// A datastore key. Node entities are keyed by their absolute path;
/// block entities are keyed by a synthetic `block.N` name parented by
/// their owning file's key (spec.md §3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// The owning file's key, for block entities. `None` for Node
    /// entities keyed directly by path.
    parent: Option<String>,
    name: String,
}

impl Key {
    pub fn node(path: &str) -> Key {
        Key {
            parent: None,
            name: path.to_string(),
        }
    }

    pub fn block(file_key: &Key, index: u64) -> Key {
        Key {
            parent: Some(file_key.to_string()),
            name: format!("block.{index}"),
        }
    }

    pub fn parent_key(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// The absolute path a Node-entity key denotes, or `None` for a
    /// block key (which is parented, not a bare path).
    pub fn as_node_path(&self) -> Option<&str> {
        if self.parent.is_none() {
            Some(&self.name)
        } else {
            None
        }
    }

    /// Unambiguous wire encoding used by backends that can only store
    /// opaque strings in a key-list property (e.g. DynamoDB's `L` of
    /// `S`): unlike `Display`, which collapses parent+name into one
    /// path-shaped string for log/debug readability, this round-trips
    /// through `decode` even when `name` itself contains `/`.
    pub fn encode(&self) -> String {
        match &self.parent {
            Some(parent) => format!("1\u{0}{parent}\u{0}{}", self.name),
            None => format!("0\u{0}{}", self.name),
        }
    }

    pub fn decode(s: &str) -> Option<Key> {
        let mut parts = s.splitn(3, '\u{0}');
        let tag = parts.next()?;
        match tag {
            "0" => Some(Key {
                parent: None,
                name: parts.next()?.to_string(),
            }),
            "1" => {
                let parent = parts.next()?.to_string();
                let name = parts.next()?.to_string();
                Some(Key {
                    parent: Some(parent),
                    name,
                })
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{parent}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// An entity as stored in (or retrieved from) the datastore: a bag of
/// named properties. Both Node and Block entities use this same
/// representation — the distinction is purely in which properties are
/// populated (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entity {
    pub properties: HashMap<String, Property>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
    KeyList(Vec<Key>),
}

impl Entity {
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(Property::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.properties.get(name) {
            Some(Property::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.properties.get(name) {
            Some(Property::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn get_key_list(&self, name: &str) -> Option<&[Key]> {
        match self.properties.get(name) {
            Some(Property::KeyList(k)) => Some(k.as_slice()),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &str, value: Property) {
        self.properties.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) {
        self.properties.remove(name);
    }

    /// A rough size estimate used to compute safe bulk-operation batch
    /// sizes (spec.md §4.1: "computes a safe batch size from a
    /// caller-supplied per-entity size hint").
    pub fn size_hint(&self) -> usize {
        self.properties
            .values()
            .map(|v| match v {
                Property::Str(s) => s.len(),
                Property::Int(_) => 8,
                Property::Bytes(b) => b.len(),
                Property::KeyList(keys) => keys.iter().map(|k| k.to_string().len()).sum(),
            })
            .sum::<usize>()
            + 64 // per-entity overhead: key, kind tag, property names
    }
}

/// A transaction handle returned by `DatastoreClient::begin_tx`,
/// used only by the write-through flush path (spec.md §4.1, §4.6).
/// Puts staged before `commit` either all land or none do.
pub trait Tx: Send {
    fn put(&mut self, key: &Key, entity: Entity) -> Result<()>;
    fn delete(&mut self, key: &Key) -> Result<()>;
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// The façade every engine component talks to. Wraps a `Backend` with
/// a read-through `Memcache` (spec.md §4.1): reads consult the cache
/// first; writes invalidate before they reach the backend, so a delete
/// can never be masked by a stale hit.
pub struct DatastoreClient {
    backend: Arc<dyn Backend>,
    cache: Memcache,
}

impl DatastoreClient {
    pub fn new(backend: Arc<dyn Backend>, cache_capacity: usize) -> DatastoreClient {
        DatastoreClient {
            backend,
            cache: Memcache::new(cache_capacity),
        }
    }

    pub fn get(&self, key: &Key) -> Result<Option<Entity>> {
        if let Some(cached) = self.cache.get(key) {
            debug!("memcache hit for {key}");
            return Ok(cached);
        }
        let value = self.backend.get(key)?;
        self.cache.put(key.clone(), value.clone());
        Ok(value)
    }

    pub fn get_many(&self, keys: &[Key]) -> Result<HashMap<Key, Entity>> {
        let mut result = HashMap::new();
        let mut misses = Vec::new();
        for key in keys {
            match self.cache.get(key) {
                Some(Some(entity)) => {
                    result.insert(key.clone(), entity);
                }
                Some(None) => {}
                None => misses.push(key.clone()),
            }
        }
        for chunk in misses.chunks(MAX_BULK_GET_ENTITIES) {
            let fetched = self.backend.get_many(chunk)?;
            for key in chunk {
                let value = fetched.get(key).cloned();
                self.cache.put(key.clone(), value.clone());
                if let Some(entity) = value {
                    result.insert(key.clone(), entity);
                }
            }
        }
        Ok(result)
    }

    pub fn put(&self, key: &Key, entity: Entity) -> Result<()> {
        self.cache.invalidate(key);
        self.backend.put(key, entity.clone())?;
        self.cache.put(key.clone(), Some(entity));
        Ok(())
    }

    pub fn put_many(&self, entities: &[(Key, Entity)]) -> Result<()> {
        for batch in batch_by_limits(entities) {
            for (key, _) in batch {
                self.cache.invalidate(key);
            }
            self.backend.put_many(batch)?;
            for (key, entity) in batch {
                self.cache.put(key.clone(), Some(entity.clone()));
            }
        }
        Ok(())
    }

    pub fn delete(&self, key: &Key) -> Result<()> {
        self.cache.invalidate(key);
        self.backend.delete(key)?;
        self.cache.put(key.clone(), None);
        Ok(())
    }

    pub fn delete_many(&self, keys: &[Key]) -> Result<()> {
        for chunk in keys.chunks(MAX_BULK_PUT_ENTITIES) {
            for key in chunk {
                self.cache.invalidate(key);
            }
            self.backend.delete_many(chunk)?;
            for key in chunk {
                self.cache.put(key.clone(), None);
            }
        }
        Ok(())
    }

    pub fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        self.backend.begin_tx()
    }

    /// Applies `entities` as a single all-or-nothing batch inside a
    /// transaction (spec.md §4.6 step 4, write-through mode). On
    /// success every key's cache entry is refreshed; on failure the
    /// cache is left untouched, same as a plain `put_many` failure
    /// would leave it — the transaction's own atomicity is the
    /// backend's concern, not the cache's.
    pub fn flush_via_tx(&self, entities: &[(Key, Entity)]) -> Result<()> {
        for (key, _) in entities {
            self.cache.invalidate(key);
        }
        let mut tx = self.begin_tx()?;
        for (key, entity) in entities {
            if let Err(e) = tx.put(key, entity.clone()) {
                tx.rollback()?;
                return Err(e);
            }
        }
        tx.commit()?;
        for (key, entity) in entities {
            self.cache.put(key.clone(), Some(entity.clone()));
        }
        Ok(())
    }
}

/// Splits `entities` into slices that each respect both the
/// entity-count limit and the total-payload-bytes limit (spec.md
/// §4.1). Mirrors the way `BlockIO::flush` (spec.md §4.6) must slice
/// its dirty-block batch, but is kept here since any bulk put on the
/// client goes through it, not only flushes.
fn batch_by_limits(entities: &[(Key, Entity)]) -> Vec<&[(Key, Entity)]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut bytes_in_batch = 0usize;
    for (i, (_, entity)) in entities.iter().enumerate() {
        let size = entity.size_hint();
        let count_in_batch = i - start;
        if count_in_batch > 0
            && (count_in_batch >= MAX_BULK_PUT_ENTITIES || bytes_in_batch + size > MAX_BULK_PUT_BYTES)
        {
            batches.push(&entities[start..i]);
            start = i;
            bytes_in_batch = 0;
        }
        bytes_in_batch += size;
    }
    if start < entities.len() {
        batches.push(&entities[start..]);
    }
    batches
}

pub(crate) fn wrap_io_err<E: std::fmt::Display>(context: &str, e: E) -> FsError {
    FsError::Io(IoError::new(format!("{context}: {e}")))
}
