//! `BlockFs`: the top-level handle gluing `DatastoreClient`,
//! `BlockCache`, `LockRegistry`, `Config` and the optional
//! `LocalOverlay` together (spec.md §2 "Control flow").
//!
//! Grounded in the teacher's top-level `LocustDB` struct
//! (`src/locustdb.rs`): a small `Arc`-wrapped façade that owns the
//! shared engine state and hands out per-resource handles (there,
//! query tasks; here, `FileNode`s).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block_cache::BlockCache;
use crate::datastore::backend::Backend;
use crate::datastore::DatastoreClient;
use crate::error::Result;
use crate::file_node::FileNode;
use crate::lock_registry::LockRegistry;
use crate::options::Config;
use crate::overlay::{LocalOverlay, NoOverlay};
use crate::path::{self, NormalizedPath};

pub struct BlockFs {
    pub(crate) datastore: DatastoreClient,
    pub(crate) block_cache: BlockCache,
    pub(crate) locks: LockRegistry,
    pub(crate) overlay: Arc<dyn LocalOverlay>,
    pub(crate) config: Config,
    open_streams: Mutex<HashSet<String>>,
}

impl BlockFs {
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Arc<BlockFs> {
        BlockFs::with_overlay(backend, config, Arc::new(NoOverlay))
    }

    pub fn with_overlay(
        backend: Arc<dyn Backend>,
        config: Config,
        overlay: Arc<dyn LocalOverlay>,
    ) -> Arc<BlockFs> {
        Arc::new(BlockFs {
            datastore: DatastoreClient::new(backend, config.memcache_capacity),
            block_cache: BlockCache::new(),
            locks: LockRegistry::new(),
            overlay,
            config,
            open_streams: Mutex::new(HashSet::new()),
        })
    }

    /// Resolves `raw_path` and returns a handle to it. The returned
    /// node is not yet attached — callers that only need to invoke a
    /// single mutating operation never pay for an extra round trip,
    /// since every mutating operation attaches internally as its
    /// first step.
    pub fn open(self: &Arc<Self>, raw_path: &str) -> Result<Arc<FileNode>> {
        let parsed = path::parse(raw_path)?;
        Ok(self.node_at(parsed))
    }

    pub(crate) fn node_at(self: &Arc<Self>, path: NormalizedPath) -> Arc<FileNode> {
        Arc::new(FileNode::new(self.clone(), path))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Claims the "one stream at a time" slot for `path` (spec.md §5
    /// "Open-stream invariant"). Released by `release_stream`, which
    /// every stream type calls from its `Drop` impl so the claim can't
    /// outlive the stream, including on panics that unwind through it.
    pub(crate) fn claim_stream(&self, path: &NormalizedPath) -> Result<()> {
        let mut open = self.open_streams.lock().unwrap();
        if open.contains(path.as_str()) {
            return Err(crate::error::FsError::AccessDenied(format!(
                "another stream is already open for {path}"
            )));
        }
        open.insert(path.as_str().to_string());
        Ok(())
    }

    pub(crate) fn release_stream(&self, path: &NormalizedPath) {
        self.open_streams.lock().unwrap().remove(path.as_str());
    }

    pub(crate) fn has_open_stream(&self, path: &NormalizedPath) -> bool {
        self.open_streams.lock().unwrap().contains(path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::backend::memory::MemoryBackend;

    fn fs() -> Arc<BlockFs> {
        BlockFs::new(Arc::new(MemoryBackend::new()), Config::default())
    }

    #[test]
    fn claim_then_release_allows_reclaiming() {
        let fs = fs();
        let p = path::parse("/a").unwrap();
        fs.claim_stream(&p).unwrap();
        assert!(fs.claim_stream(&p).is_err());
        fs.release_stream(&p);
        assert!(fs.claim_stream(&p).is_ok());
    }
}
