//! `blockfs`: a POSIX-like virtual filesystem whose persistent backing
//! is a typed key-value datastore that offers no block devices, random
//! -access file I/O, or directory primitives of its own.
//!
//! The crate maps a filesystem namespace onto datastore entities,
//! lays files out as a sequence of fixed-size blocks with a lazily
//! materialised dirty-block cache, batches writes to respect the
//! datastore's bulk-operation limits, and serialises directory
//! mutations against file mutations with a path-keyed advisory lock
//! registry. See `DatastoreClient`, `BlockCache`, `LockRegistry`,
//! `FileNode` and `BlockFs` for the component breakdown.

pub mod block_cache;
pub mod block_io;
pub mod datastore;
pub mod error;
pub mod file_node;
pub mod fs;
pub mod lock_registry;
pub mod metadata;
pub mod options;
pub mod overlay;
pub mod path;

pub use error::{FsError, Result};
pub use file_node::{BasicAttributes, BlockFsAttributes, FileNode, ReadStream, WriteStream};
pub use fs::BlockFs;
pub use metadata::NodeKind;
pub use options::{Config, CopyOptions, MoveOptions, OpenOptions};
pub use path::NormalizedPath;
