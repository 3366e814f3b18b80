//! `FileNode`: attach/detach lifecycle, create/delete/rename/copy,
//! child-list maintenance, read/write streams, dirty-block flushing
//! (spec.md §4.5, §4.7).
//!
//! No single teacher file maps onto this orchestration object — the
//! teacher's columnar engine has no notion of a mutable file — so it
//! follows the teacher's idiom (explicit `Result`, `log::{debug,warn}`
//! at lock/attach/flush boundaries, `Mutex`-guarded in-memory state)
//! rather than a specific source file.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::block_io;
use crate::datastore::Key;
use crate::error::{FsError, Result};
use crate::fs::BlockFs;
use crate::metadata::{Contents, MetadataEntity, NodeKind};
use crate::options::{CopyOptions, MoveOptions, OpenOptions};
use crate::overlay::OverlayChild;
use crate::path::{self, NormalizedPath};

/// spec.md §4.7: Imaginary → AttachedFile | AttachedFolder → Deleted.
#[derive(Debug, Clone)]
enum NodeState {
    Imaginary,
    Attached(MetadataEntity),
    Deleted,
}

/// Plain attribute view (spec.md §6 "basic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicAttributes {
    pub kind: NodeKind,
    pub size: u64,
    pub last_modified_millis: i64,
}

/// Engine-specific attribute view (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFsAttributes {
    pub block_size: u32,
    pub block_count: u64,
    pub content_size: u64,
}

pub struct FileNode {
    pub(crate) fs: Arc<BlockFs>,
    pub(crate) path: NormalizedPath,
    pub(crate) key: Key,
    state: Mutex<NodeState>,
    /// Set whenever a write/truncate changes metadata (content-size,
    /// in particular) without necessarily touching a block — e.g. a
    /// pure truncate deletes blocks eagerly (spec.md §4.6 step 2) but
    /// defers the content-size update, so `BlockCache`'s per-block
    /// dirty flags alone can't tell `flush`/`detach` whether metadata
    /// still needs persisting.
    meta_dirty: Mutex<bool>,
}

impl FileNode {
    pub(crate) fn new(fs: Arc<BlockFs>, path: NormalizedPath) -> FileNode {
        let key = Key::node(path.as_str());
        FileNode {
            fs,
            path,
            key,
            state: Mutex::new(NodeState::Imaginary),
            meta_dirty: Mutex::new(false),
        }
    }

    fn mark_meta_dirty(&self) {
        *self.meta_dirty.lock().unwrap() = true;
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    fn child(&self, path: NormalizedPath) -> Arc<FileNode> {
        self.fs.node_at(path)
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    /// Loads metadata on first use; a no-op once attached (spec.md
    /// §4.5 "Attach", §9 "pure function of (path, datastore state)").
    ///
    /// When the datastore has no entity for this path, an overlay that
    /// reports the path as existing still attaches it as a folder
    /// (SPEC_FULL.md §4.10 / DESIGN.md Open Question 1): the in-memory
    /// entity is never persisted by this path alone, only synthesised
    /// so reads and enumeration see it.
    pub fn attach(&self) -> Result<()> {
        let mut state = self.state();
        if !matches!(*state, NodeState::Imaginary) {
            return Ok(());
        }
        match self.fs.datastore.get(&self.key)? {
            Some(entity) => {
                let meta = MetadataEntity::from_entity(&entity).ok_or_else(|| {
                    FsError::Io(crate::error::IoError::new(format!(
                        "malformed node entity at {}",
                        self.path
                    )))
                })?;
                debug!("attached {} as {:?}", self.path, meta.kind());
                *state = NodeState::Attached(meta);
            }
            None if self.fs.overlay.exists(&self.path) => {
                debug!("{} materialised from the overlay as a folder", self.path);
                *state = NodeState::Attached(MetadataEntity::new_folder(self.fs.now_millis()));
            }
            None => {
                debug!("{} is imaginary", self.path);
            }
        }
        Ok(())
    }

    /// Re-reads this node's metadata directly from the datastore,
    /// bypassing `attach()`'s memoization, and overwrites the in-memory
    /// state with whatever is current. Callers that hold this node's
    /// own advisory lock and need to observe the *current* child-keys
    /// — not whatever snapshot `attach()` happened to load before the
    /// lock was acquired — must call this instead of reading `state()`
    /// directly (spec.md §4.3): the lock only excludes concurrent
    /// mutators, it does not retroactively refresh a stale in-memory
    /// copy taken before the lock was held.
    fn refetch_attached(&self) -> Result<MetadataEntity> {
        match self.fs.datastore.get(&self.key)? {
            Some(entity) => {
                let meta = MetadataEntity::from_entity(&entity).ok_or_else(|| {
                    FsError::Io(crate::error::IoError::new(format!(
                        "malformed node entity at {}",
                        self.path
                    )))
                })?;
                *self.state() = NodeState::Attached(meta.clone());
                Ok(meta)
            }
            None => {
                *self.state() = NodeState::Deleted;
                Err(FsError::NoSuchFile(self.path.to_string()))
            }
        }
    }

    /// spec.md §4.5 "Detach": permitted only when no dirty blocks
    /// remain for this file.
    pub fn detach(&self) -> Result<()> {
        let mut state = self.state();
        if let NodeState::Attached(meta) = &*state {
            let has_dirty_blocks = meta.block_keys().iter().any(|k| self.fs.block_cache.is_dirty(k));
            if has_dirty_blocks || *self.meta_dirty.lock().unwrap() {
                return Err(FsError::AccessDenied(format!(
                    "{}: cannot detach with unflushed blocks",
                    self.path
                )));
            }
        }
        *state = NodeState::Imaginary;
        Ok(())
    }

    pub fn exists(&self) -> Result<bool> {
        self.attach()?;
        Ok(matches!(*self.state(), NodeState::Attached(_)))
    }

    pub fn kind(&self) -> Result<Option<NodeKind>> {
        self.attach()?;
        Ok(match &*self.state() {
            NodeState::Attached(m) => Some(m.kind()),
            _ => None,
        })
    }

    fn require_attached<R>(&self, f: impl FnOnce(&MetadataEntity) -> Result<R>) -> Result<R> {
        self.attach()?;
        match &*self.state() {
            NodeState::Attached(meta) => f(meta),
            NodeState::Deleted | NodeState::Imaginary => {
                Err(FsError::NoSuchFile(self.path.to_string()))
            }
        }
    }

    pub fn basic_attributes(&self) -> Result<BasicAttributes> {
        self.require_attached(|meta| {
            let size = meta.content_size().unwrap_or(0);
            Ok(BasicAttributes {
                kind: meta.kind(),
                size,
                last_modified_millis: meta.last_modified_millis,
            })
        })
    }

    pub fn blockfs_attributes(&self) -> Result<BlockFsAttributes> {
        self.require_attached(|meta| match meta.kind() {
            NodeKind::File => Ok(BlockFsAttributes {
                block_size: meta.block_size().unwrap_or(0),
                block_count: meta.block_keys().len() as u64,
                content_size: meta.content_size().unwrap_or(0),
            }),
            NodeKind::Folder => Err(FsError::NotDirectory(format!(
                "{}: blockfs_attributes is file-only",
                self.path
            ))),
        })
    }

    // --- creation -----------------------------------------------------

    /// spec.md §4.5 "Create file".
    pub fn create_file(&self, opts: OpenOptions, block_size: Option<u32>) -> Result<()> {
        opts.validate()?;
        let parent_path = path::parent(&self.path)
            .ok_or_else(|| FsError::AccessDenied("cannot create the root".to_string()))?;
        let block_size = block_size.unwrap_or(self.fs.config.default_block_size);
        self.fs.config.validate_block_size(block_size)?;

        let already_exists = self.fs.locks.with_lock(parent_path.as_str(), || {
            let parent = self.child(parent_path.clone());
            parent.attach()?;
            {
                let pstate = parent.state();
                match &*pstate {
                    NodeState::Attached(m) if m.is_folder() => {}
                    NodeState::Attached(_) => {
                        return Err(FsError::NotDirectory(parent_path.to_string()))
                    }
                    _ => return Err(FsError::NoSuchFile(parent_path.to_string())),
                }
            }

            self.attach()?;
            if matches!(*self.state(), NodeState::Attached(_)) {
                return Ok(true);
            }

            let now = self.fs.now_millis();
            let meta = MetadataEntity::new_file(block_size, now);

            let mut pstate = parent.state();
            if let NodeState::Attached(pmeta) = &mut *pstate {
                pmeta.child_keys_mut().push(self.key.clone());
                pmeta.last_modified_millis = now;
                self.fs.datastore.put(&parent.key, pmeta.to_entity())?;
            }
            drop(pstate);

            self.fs.datastore.put(&self.key, meta.to_entity())?;
            *self.state() = NodeState::Attached(meta);
            Ok(false)
        })?;

        if already_exists && opts.create_new {
            return Err(FsError::AlreadyExists(self.path.to_string()));
        }
        Ok(())
    }

    /// spec.md §4.5 "Create folder".
    pub fn create_folder(&self) -> Result<()> {
        let parent_path = path::parent(&self.path)
            .ok_or_else(|| FsError::AccessDenied("cannot create the root".to_string()))?;

        self.fs.locks.with_lock(parent_path.as_str(), || {
            let parent = self.child(parent_path.clone());
            parent.attach()?;
            {
                let pstate = parent.state();
                match &*pstate {
                    NodeState::Attached(m) if m.is_folder() => {}
                    NodeState::Attached(_) => {
                        return Err(FsError::NotDirectory(parent_path.to_string()))
                    }
                    _ => return Err(FsError::NoSuchFile(parent_path.to_string())),
                }
            }

            self.attach()?;
            if matches!(*self.state(), NodeState::Attached(_)) {
                return Err(FsError::AlreadyExists(self.path.to_string()));
            }

            let now = self.fs.now_millis();
            let meta = MetadataEntity::new_folder(now);

            let mut pstate = parent.state();
            if let NodeState::Attached(pmeta) = &mut *pstate {
                pmeta.child_keys_mut().push(self.key.clone());
                pmeta.last_modified_millis = now;
                self.fs.datastore.put(&parent.key, pmeta.to_entity())?;
            }
            drop(pstate);

            self.fs.datastore.put(&self.key, meta.to_entity())?;
            *self.state() = NodeState::Attached(meta);
            Ok(())
        })
    }

    // --- deletion -------------------------------------------------------

    /// spec.md §4.5 "Delete".
    pub fn delete(&self) -> Result<()> {
        if self.path.is_root() {
            return Err(FsError::AccessDenied("cannot delete the root".to_string()));
        }
        if self.fs.has_open_stream(&self.path) {
            return Err(FsError::AccessDenied(format!(
                "{}: cannot delete while a stream is open",
                self.path
            )));
        }
        self.attach()?;
        let kind = match &*self.state() {
            NodeState::Attached(m) => m.kind(),
            _ => return Err(FsError::NoSuchFile(self.path.to_string())),
        };
        match kind {
            NodeKind::Folder => self.delete_folder(),
            NodeKind::File => self.delete_file(),
        }
    }

    fn delete_folder(&self) -> Result<()> {
        self.fs.locks.with_lock(self.path.as_str(), || {
            // Re-read under the lock: `self.state()` may hold a
            // snapshot `attach()` loaded before this lock was
            // acquired, which a concurrent child-creator (itself
            // serialised on this same lock name) could have since
            // invalidated by appending to `child-keys` and committing.
            let meta = self.refetch_attached()?;
            if !meta.child_keys().is_empty() {
                return Err(FsError::DirectoryNotEmpty(self.path.to_string()));
            }
            self.notify_parent_of_removal()?;
            self.fs.datastore.delete(&self.key)?;
            *self.state() = NodeState::Deleted;
            Ok(())
        })
    }

    fn delete_file(&self) -> Result<()> {
        let block_keys = match &*self.state() {
            NodeState::Attached(meta) => meta.block_keys().to_vec(),
            _ => return Err(FsError::NoSuchFile(self.path.to_string())),
        };
        if !block_keys.is_empty() {
            self.fs.datastore.delete_many(&block_keys)?;
            self.fs.block_cache.evict_all(&block_keys);
        }
        self.notify_parent_of_removal()?;
        self.fs.datastore.delete(&self.key)?;
        *self.state() = NodeState::Deleted;
        Ok(())
    }

    fn notify_parent_of_removal(&self) -> Result<()> {
        let parent_path = match path::parent(&self.path) {
            Some(p) => p,
            None => return Ok(()),
        };
        self.fs.locks.with_lock(parent_path.as_str(), || {
            let parent = self.child(parent_path.clone());
            parent.attach()?;
            let mut pstate = parent.state();
            if let NodeState::Attached(pmeta) = &mut *pstate {
                pmeta.child_keys_mut().retain(|k| k != &self.key);
                self.fs.datastore.put(&parent.key, pmeta.to_entity())?;
            }
            Ok(())
        })
    }

    // --- rename / copy --------------------------------------------------

    /// spec.md §4.5 "Rename (move)".
    pub fn rename_to(&self, dest: &FileNode, opts: MoveOptions) -> Result<()> {
        if opts.atomic_move {
            return Err(FsError::AtomicMoveNotSupported);
        }
        if self.fs.has_open_stream(&self.path) {
            return Err(FsError::AccessDenied(format!(
                "{}: cannot move while a stream is open",
                self.path
            )));
        }
        self.attach()?;
        let (kind, block_size, content_size) = match &*self.state() {
            NodeState::Attached(m) => (m.kind(), m.block_size(), m.content_size().unwrap_or(0)),
            _ => return Err(FsError::NoSuchFile(self.path.to_string())),
        };
        if kind == NodeKind::Folder {
            // Re-verify emptiness under this folder's own lock (spec.md
            // §4.3: "A folder during its own delete or rename, to block
            // concurrent child creation"). The attach above may have
            // loaded a snapshot well before this lock was acquired; a
            // concurrent creator serialised on the same lock name could
            // have added a child since, so the pre-lock snapshot cannot
            // be trusted here.
            self.fs.locks.with_lock(self.path.as_str(), || {
                let meta = self.refetch_attached()?;
                if !meta.child_keys().is_empty() {
                    return Err(FsError::DirectoryNotEmpty(self.path.to_string()));
                }
                Ok(())
            })?;
        }

        dest.attach()?;
        if matches!(*dest.state(), NodeState::Attached(_)) {
            if opts.replace_existing {
                dest.delete()?;
            } else {
                return Err(FsError::AlreadyExists(dest.path.to_string()));
            }
        }

        match kind {
            NodeKind::Folder => {
                dest.create_folder()?;
            }
            NodeKind::File => {
                dest.create_file(OpenOptions::default(), block_size)?;
                self.copy_blocks_into(dest)?;
                {
                    let mut dstate = dest.state();
                    if let NodeState::Attached(dmeta) = &mut *dstate {
                        dmeta.set_content_size(content_size);
                    }
                }
                dest.mark_meta_dirty();
                dest.flush()?;
            }
        }

        self.delete()
    }

    /// spec.md §4.5 "Copy".
    pub fn copy_to(&self, dest: &FileNode, opts: CopyOptions) -> Result<()> {
        self.attach()?;
        let (kind, block_size, content_size, last_modified) = match &*self.state() {
            NodeState::Attached(m) => (
                m.kind(),
                m.block_size(),
                m.content_size().unwrap_or(0),
                m.last_modified_millis,
            ),
            _ => return Err(FsError::NoSuchFile(self.path.to_string())),
        };

        dest.attach()?;
        if matches!(*dest.state(), NodeState::Attached(_)) {
            if opts.replace_existing {
                dest.delete()?;
            } else {
                return Err(FsError::AlreadyExists(dest.path.to_string()));
            }
        }

        match kind {
            NodeKind::Folder => {
                dest.create_folder()?;
            }
            NodeKind::File => {
                dest.create_file(OpenOptions::default(), block_size)?;
                self.copy_blocks_into(dest)?;
                {
                    let mut dstate = dest.state();
                    if let NodeState::Attached(dmeta) = &mut *dstate {
                        dmeta.set_content_size(content_size);
                        if opts.copy_attributes {
                            dmeta.last_modified_millis = last_modified;
                        }
                    }
                }
                dest.mark_meta_dirty();
                dest.flush()?;
            }
        }
        Ok(())
    }

    fn copy_blocks_into(&self, dest: &FileNode) -> Result<()> {
        let src_block_keys = match &*self.state() {
            NodeState::Attached(m) => m.block_keys().to_vec(),
            _ => return Err(FsError::NoSuchFile(self.path.to_string())),
        };
        for (index, src_key) in src_block_keys.iter().enumerate() {
            let entity = match self.fs.block_cache.get(src_key) {
                Some(e) => e,
                None => self.fs.datastore.get(src_key)?.ok_or_else(|| {
                    FsError::Io(crate::error::IoError::new(format!(
                        "block {src_key} missing during copy"
                    )))
                })?,
            };
            let dest_key = Key::block(&dest.key, index as u64);
            self.fs.block_cache.put(dest_key.clone(), entity);
            self.fs.block_cache.mark_dirty(&dest_key, true);
            let mut dstate = dest.state();
            if let NodeState::Attached(dmeta) = &mut *dstate {
                dmeta.block_keys_mut().push(dest_key);
            }
        }
        Ok(())
    }

    // --- directory listing ----------------------------------------------

    /// spec.md §4.5 "List children".
    pub fn list_children(&self) -> Result<Vec<Arc<FileNode>>> {
        self.attach()?;
        let mut seen = std::collections::HashSet::new();
        let mut children = Vec::new();

        let real_child_keys = match &*self.state() {
            NodeState::Attached(meta) if meta.is_folder() => meta.child_keys().to_vec(),
            NodeState::Attached(_) => {
                return Err(FsError::NotDirectory(self.path.to_string()))
            }
            _ => {
                if !self.fs.overlay.exists(&self.path) {
                    return Err(FsError::NoSuchFile(self.path.to_string()));
                }
                Vec::new()
            }
        };

        for key in &real_child_keys {
            if let Some(child_path) = key.as_node_path() {
                if seen.insert(child_path.to_string()) {
                    children.push(self.child(path::parse(child_path)?));
                }
            }
        }

        let overlay_children: Vec<OverlayChild> = self.fs.overlay.children(&self.path);
        for overlay_child in overlay_children {
            if seen.insert(overlay_child.name.clone()) {
                let child_path = path::resolve(&self.path, &overlay_child.name)?;
                children.push(self.child(child_path));
            }
        }

        Ok(children)
    }

    // --- read/write streams ----------------------------------------------

    pub fn open_read(self: &Arc<Self>) -> Result<ReadStream> {
        self.attach()?;
        self.require_attached(|meta| {
            if !meta.is_file() {
                return Err(FsError::NotDirectory(self.path.to_string()));
            }
            Ok(())
        })?;
        self.fs.claim_stream(&self.path)?;
        Ok(ReadStream {
            node: self.clone(),
            position: 0,
        })
    }

    pub fn open_write(self: &Arc<Self>, opts: OpenOptions) -> Result<WriteStream> {
        opts.validate()?;
        if !opts.wants_write() {
            return Err(FsError::AccessDenied(format!(
                "{}: open_write requires WRITE or APPEND",
                self.path
            )));
        }
        self.attach()?;
        let exists = matches!(*self.state(), NodeState::Attached(_));
        if !exists {
            if opts.create || opts.create_new {
                self.create_file(opts, None)?;
            } else {
                return Err(FsError::NoSuchFile(self.path.to_string()));
            }
        } else if opts.create_new {
            return Err(FsError::AlreadyExists(self.path.to_string()));
        }

        self.require_attached(|meta| {
            if !meta.is_file() {
                return Err(FsError::NotDirectory(self.path.to_string()));
            }
            Ok(())
        })?;

        self.fs.claim_stream(&self.path)?;
        let mut stream = WriteStream {
            node: self.clone(),
            position: 0,
        };
        if opts.truncate_existing {
            if let Err(e) = stream.truncate(0) {
                self.fs.release_stream(&self.path);
                return Err(e);
            }
        }
        if opts.append {
            stream.position = self.require_attached(|m| Ok(m.content_size().unwrap_or(0)))?;
        }
        Ok(stream)
    }

    /// spec.md §4.6 "Flush".
    pub fn flush(&self) -> Result<()> {
        let state = self.state();
        match &*state {
            NodeState::Attached(meta) => {
                let metadata_dirty = *self.meta_dirty.lock().unwrap();
                block_io::flush(
                    &self.fs.datastore,
                    &self.fs.block_cache,
                    &self.key,
                    meta,
                    metadata_dirty,
                    self.fs.config.write_through,
                )?;
                *self.meta_dirty.lock().unwrap() = false;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

pub struct ReadStream {
    node: Arc<FileNode>,
    position: u64,
}

impl ReadStream {
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let data = self.node.require_attached(|meta| {
            block_io::read_at(
                &self.node.fs.datastore,
                &self.node.fs.block_cache,
                &self.node.key,
                meta,
                self.position,
                len,
            )
        })?;
        self.position += data.len() as u64;
        Ok(data)
    }
}

impl Drop for ReadStream {
    fn drop(&mut self) {
        self.node.fs.release_stream(&self.node.path);
        if let NodeState::Attached(meta) = &*self.node.state() {
            self.node.fs.block_cache.evict_all(meta.block_keys());
        }
    }
}

pub struct WriteStream {
    node: Arc<FileNode>,
    position: u64,
}

impl WriteStream {
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.node.state();
        match &mut *state {
            NodeState::Attached(meta) => {
                block_io::write_at(
                    &self.node.fs.datastore,
                    &self.node.fs.block_cache,
                    &self.node.key,
                    meta,
                    self.position,
                    data,
                )?;
            }
            _ => return Err(FsError::NoSuchFile(self.node.path.to_string())),
        }
        drop(state);
        self.node.mark_meta_dirty();
        self.position += data.len() as u64;
        Ok(())
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        let mut state = self.node.state();
        let result = match &mut *state {
            NodeState::Attached(meta) => block_io::truncate(
                &self.node.fs.datastore,
                &self.node.fs.block_cache,
                meta,
                len,
            ),
            _ => Err(FsError::NoSuchFile(self.node.path.to_string())),
        };
        drop(state);
        if result.is_ok() {
            self.node.mark_meta_dirty();
        }
        result
    }

    pub fn flush(&mut self) -> Result<()> {
        self.node.flush()
    }
}

impl Drop for WriteStream {
    fn drop(&mut self) {
        if let Err(e) = self.node.flush() {
            warn!("flush on stream close failed for {}: {e}", self.node.path);
        }
        self.node.fs.release_stream(&self.node.path);
        if let NodeState::Attached(meta) = &*self.node.state() {
            self.node.fs.block_cache.evict_all(meta.block_keys());
        }
    }
}
