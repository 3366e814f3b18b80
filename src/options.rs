//! Engine configuration and per-call option sets (spec.md §6).

/// Engine-wide configuration, analogous to the teacher's `Options`
/// struct (`src/locustdb.rs`): one place for tunables that the
/// embedding application loads from its own CLI/config layer and
/// passes in at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default block size for newly created files that don't specify one.
    pub default_block_size: u32,
    /// Inclusive lower bound for a valid block size.
    pub min_block_size: u32,
    /// Inclusive upper bound for a valid block size.
    pub max_block_size: u32,
    /// Number of entities held in the read-through memcache.
    pub memcache_capacity: usize,
    /// Perform flushes inside a datastore transaction (spec.md §4.6 step 4).
    pub write_through: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            default_block_size: 256 * 1024,
            min_block_size: 8 * 1024,
            max_block_size: 1024 * 1024,
            memcache_capacity: 4096,
            write_through: true,
        }
    }
}

impl Config {
    pub fn validate_block_size(&self, block_size: u32) -> Result<(), crate::error::FsError> {
        if block_size < self.min_block_size || block_size > self.max_block_size {
            Err(crate::error::FsError::InvalidPath(format!(
                "block size {block_size} outside permitted range [{}, {}]",
                self.min_block_size, self.max_block_size
            )))
        } else {
            Ok(())
        }
    }
}

/// Options governing how a file is opened (spec.md §6 table).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub create: bool,
    pub create_new: bool,
    pub append: bool,
    pub read: bool,
    pub write: bool,
    pub truncate_existing: bool,
    pub sync: bool,
    pub dsync: bool,
    pub sparse: bool,
    pub delete_on_close: bool,
}

impl OpenOptions {
    /// Rejects combinations the engine refuses outright, before any
    /// datastore round trip is attempted.
    pub fn validate(&self) -> Result<(), crate::error::FsError> {
        if self.sync || self.dsync || self.sparse || self.delete_on_close {
            return Err(crate::error::FsError::UnsupportedOption(
                "SYNC/DSYNC/SPARSE/DELETE_ON_CLOSE are not supported".to_string(),
            ));
        }
        if self.append && (self.read || self.truncate_existing) {
            return Err(crate::error::FsError::UnsupportedOption(
                "APPEND is incompatible with READ or TRUNCATE_EXISTING".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wants_write(&self) -> bool {
        self.write || self.append
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    pub replace_existing: bool,
    pub copy_attributes: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    pub replace_existing: bool,
    pub atomic_move: bool,
}
