//! In-memory representation of a Node entity (spec.md §3, §4.5).

use crate::datastore::{Entity, Key, Property};

pub const PROP_FILETYPE: &str = "filetype";
pub const PROP_LAST_MODIFIED: &str = "last-modified";
pub const PROP_CHILD_KEYS: &str = "child-keys";
pub const PROP_BLOCK_KEYS: &str = "block-keys";
pub const PROP_BLOCK_SIZE: &str = "block-size";
pub const PROP_CONTENT_SIZE: &str = "content-size";

const FILETYPE_FILE: &str = "FILE";
const FILETYPE_FOLDER: &str = "FOLDER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

/// The file-or-folder-specific payload of a `MetadataEntity`. Kept as
/// a tagged sum rather than two subtypes (spec.md §9: "best modelled
/// as a tagged sum with methods dispatched on the tag"), since the
/// `Imaginary` case is the third tag and shares the whole rest of the
/// struct (path, last-modified) with the other two.
#[derive(Debug, Clone)]
pub enum Contents {
    File {
        block_keys: Vec<Key>,
        block_size: u32,
        content_size: u64,
    },
    Folder {
        child_keys: Vec<Key>,
    },
}

/// A node's in-memory metadata, loaded (or freshly initialised) by
/// `FileNode::attach` and written back by `flush`.
#[derive(Debug, Clone)]
pub struct MetadataEntity {
    pub last_modified_millis: i64,
    pub contents: Contents,
}

impl MetadataEntity {
    pub fn new_file(block_size: u32, now_millis: i64) -> MetadataEntity {
        MetadataEntity {
            last_modified_millis: now_millis,
            contents: Contents::File {
                block_keys: Vec::new(),
                block_size,
                content_size: 0,
            },
        }
    }

    pub fn new_folder(now_millis: i64) -> MetadataEntity {
        MetadataEntity {
            last_modified_millis: now_millis,
            contents: Contents::Folder {
                child_keys: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.contents {
            Contents::File { .. } => NodeKind::File,
            Contents::Folder { .. } => NodeKind::Folder,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.contents, Contents::File { .. })
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.contents, Contents::Folder { .. })
    }

    pub fn block_keys(&self) -> &[Key] {
        match &self.contents {
            Contents::File { block_keys, .. } => block_keys,
            Contents::Folder { .. } => &[],
        }
    }

    pub fn block_keys_mut(&mut self) -> &mut Vec<Key> {
        match &mut self.contents {
            Contents::File { block_keys, .. } => block_keys,
            Contents::Folder { .. } => panic!("block_keys_mut called on a folder"),
        }
    }

    pub fn block_size(&self) -> Option<u32> {
        match &self.contents {
            Contents::File { block_size, .. } => Some(*block_size),
            Contents::Folder { .. } => None,
        }
    }

    pub fn content_size(&self) -> Option<u64> {
        match &self.contents {
            Contents::File { content_size, .. } => Some(*content_size),
            Contents::Folder { .. } => None,
        }
    }

    pub fn set_content_size(&mut self, size: u64) {
        if let Contents::File { content_size, .. } = &mut self.contents {
            *content_size = size;
        }
    }

    pub fn child_keys(&self) -> &[Key] {
        match &self.contents {
            Contents::Folder { child_keys } => child_keys,
            Contents::File { .. } => &[],
        }
    }

    pub fn child_keys_mut(&mut self) -> &mut Vec<Key> {
        match &mut self.contents {
            Contents::Folder { child_keys } => child_keys,
            Contents::File { .. } => panic!("child_keys_mut called on a file"),
        }
    }

    /// Round-trips through the same property-bag shape the datastore
    /// stores (spec.md §3). `filetype` is always (re-)written on the
    /// way out — spec.md §4.6 step 3 calls this out explicitly as
    /// "paranoia for imaginary → FILE transitions".
    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::default();
        entity.set(
            PROP_LAST_MODIFIED,
            Property::Int(self.last_modified_millis),
        );
        match &self.contents {
            Contents::File {
                block_keys,
                block_size,
                content_size,
            } => {
                entity.set(PROP_FILETYPE, Property::Str(FILETYPE_FILE.to_string()));
                entity.set(PROP_BLOCK_KEYS, Property::KeyList(block_keys.clone()));
                entity.set(PROP_BLOCK_SIZE, Property::Int(*block_size as i64));
                entity.set(PROP_CONTENT_SIZE, Property::Int(*content_size as i64));
            }
            Contents::Folder { child_keys } => {
                entity.set(PROP_FILETYPE, Property::Str(FILETYPE_FOLDER.to_string()));
                if !child_keys.is_empty() {
                    entity.set(PROP_CHILD_KEYS, Property::KeyList(child_keys.clone()));
                }
            }
        }
        entity
    }

    pub fn from_entity(entity: &Entity) -> Option<MetadataEntity> {
        let last_modified_millis = entity.get_int(PROP_LAST_MODIFIED).unwrap_or(0);
        match entity.get_str(PROP_FILETYPE)? {
            FILETYPE_FILE => Some(MetadataEntity {
                last_modified_millis,
                contents: Contents::File {
                    block_keys: entity.get_key_list(PROP_BLOCK_KEYS).unwrap_or(&[]).to_vec(),
                    block_size: entity.get_int(PROP_BLOCK_SIZE).unwrap_or(0) as u32,
                    content_size: entity.get_int(PROP_CONTENT_SIZE).unwrap_or(0) as u64,
                },
            }),
            FILETYPE_FOLDER => Some(MetadataEntity {
                last_modified_millis,
                contents: Contents::Folder {
                    child_keys: entity.get_key_list(PROP_CHILD_KEYS).unwrap_or(&[]).to_vec(),
                },
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_round_trips_through_entity() {
        let mut meta = MetadataEntity::new_file(8192, 1000);
        meta.block_keys_mut().push(Key::block(&Key::node("/a"), 0));
        meta.set_content_size(42);
        let entity = meta.to_entity();
        let back = MetadataEntity::from_entity(&entity).unwrap();
        assert!(back.is_file());
        assert_eq!(back.content_size(), Some(42));
        assert_eq!(back.block_size(), Some(8192));
        assert_eq!(back.block_keys().len(), 1);
    }

    #[test]
    fn empty_folder_omits_child_keys_property() {
        let meta = MetadataEntity::new_folder(0);
        let entity = meta.to_entity();
        assert!(entity.get_key_list(PROP_CHILD_KEYS).is_none());
    }
}
