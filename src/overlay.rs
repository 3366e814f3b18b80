//! Read-side "combined local" overlay seam (spec.md §1 "Out of
//! scope"; §4.5 "List children"; §4.10 shadow-folder resolution).
//!
//! The overlay provider itself — shadowing a real on-disk directory
//! tree — is an external collaborator the engine is built to be driven
//! alongside, not something this crate implements. What the engine
//! does own is the trait seam and enough default behaviour that the
//! engine works correctly with no overlay configured at all.

use crate::path::NormalizedPath;

/// A child name an overlay contributes, plus whether the overlay
/// itself thinks that child is a directory (so `list_children` can
/// synthesize a folder-shaped `FileNode` for it without a metadata
/// entity — see SPEC_FULL.md §4.10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayChild {
    pub name: String,
    pub is_directory: bool,
}

pub trait LocalOverlay: Send + Sync {
    /// Children of `path` as seen by the overlay, or an empty vec if
    /// the overlay has nothing to contribute there.
    fn children(&self, path: &NormalizedPath) -> Vec<OverlayChild>;

    /// Whether the overlay has anything at all at `path` (used by
    /// `attach` to decide whether an otherwise-imaginary path should
    /// still resolve as a directory for read purposes).
    fn exists(&self, path: &NormalizedPath) -> bool;
}

/// The default: no overlay configured, so every query is empty. This
/// is what `BlockFs` uses unless an embedder supplies a real one.
pub struct NoOverlay;

impl LocalOverlay for NoOverlay {
    fn children(&self, _path: &NormalizedPath) -> Vec<OverlayChild> {
        Vec::new()
    }

    fn exists(&self, _path: &NormalizedPath) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// A minimal real-directory-backed overlay, standing in for the
    /// kind of external collaborator this module's doc comment
    /// describes, just enough to exercise the trait seam end to end.
    struct DirOverlay {
        root: PathBuf,
    }

    impl DirOverlay {
        fn resolve(&self, path: &NormalizedPath) -> PathBuf {
            let mut p = self.root.clone();
            for component in path.as_str().split('/').filter(|c| !c.is_empty()) {
                p.push(component);
            }
            p
        }
    }

    impl LocalOverlay for DirOverlay {
        fn children(&self, path: &NormalizedPath) -> Vec<OverlayChild> {
            let dir = self.resolve(path);
            let Ok(entries) = fs::read_dir(&dir) else {
                return Vec::new();
            };
            entries
                .filter_map(|e| e.ok())
                .map(|e| OverlayChild {
                    name: e.file_name().to_string_lossy().into_owned(),
                    is_directory: e.file_type().map(|t| t.is_dir()).unwrap_or(false),
                })
                .collect()
        }

        fn exists(&self, path: &NormalizedPath) -> bool {
            self.resolve(path).exists()
        }
    }

    #[test]
    fn dir_overlay_reflects_real_filesystem_entries() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("shadow")).unwrap();
        fs::write(tmp.path().join("shadow").join("note.txt"), b"hi").unwrap();

        let overlay = DirOverlay {
            root: tmp.path().to_path_buf(),
        };
        let root = crate::path::root();
        assert!(overlay.exists(&root));

        let shadow = crate::path::parse("/shadow").unwrap();
        let mut names: Vec<String> = overlay.children(&shadow).into_iter().map(|c| c.name).collect();
        names.sort();
        assert_eq!(names, vec!["note.txt"]);

        let missing = crate::path::parse("/nope").unwrap();
        assert!(!overlay.exists(&missing));
        assert!(overlay.children(&missing).is_empty());
    }

    #[test]
    fn no_overlay_is_always_empty() {
        let overlay = NoOverlay;
        let root = crate::path::root();
        assert!(!overlay.exists(&root));
        assert!(overlay.children(&root).is_empty());
    }
}
