use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use blockfs::datastore::backend::memory::MemoryBackend;
use blockfs::options::{Config, CopyOptions, MoveOptions, OpenOptions};
use blockfs::overlay::{LocalOverlay, OverlayChild};
use blockfs::path::NormalizedPath;
use blockfs::{BlockFs, FsError, NodeKind};

/// An overlay that knows about a single fixed directory and nothing
/// else, just enough to drive `attach`/`kind`/`exists`/`list_children`
/// through the overlay seam without a real shadow filesystem.
struct FixedOverlay {
    dirs: HashSet<String>,
}

impl LocalOverlay for FixedOverlay {
    fn children(&self, _path: &NormalizedPath) -> Vec<OverlayChild> {
        Vec::new()
    }

    fn exists(&self, path: &NormalizedPath) -> bool {
        self.dirs.contains(path.as_str())
    }
}

fn fs() -> Arc<BlockFs> {
    let _ = env_logger::try_init();
    BlockFs::new(Arc::new(MemoryBackend::new()), Config::default())
}

fn write_opts() -> OpenOptions {
    OpenOptions {
        create: true,
        write: true,
        ..Default::default()
    }
}

#[test]
fn create_write_read_round_trip() {
    let fs = fs();
    let node = fs.open("/greeting.txt").unwrap();
    let mut w = node.open_write(write_opts()).unwrap();
    w.write(b"hello, ").unwrap();
    w.write(b"world").unwrap();
    w.flush().unwrap();
    drop(w);

    let attrs = node.blockfs_attributes().unwrap();
    assert_eq!(attrs.content_size, 12);

    let mut r = node.open_read().unwrap();
    let data = r.read(1024).unwrap();
    assert_eq!(data, b"hello, world");
}

#[test]
fn truncate_downward_drops_trailing_blocks() {
    let fs = fs();
    let block_size = 8 * 1024; // minimum permitted block size
    let node = fs.open("/tiny.bin").unwrap();
    node.create_file(
        OpenOptions { create: true, write: true, ..Default::default() },
        Some(block_size),
    ).unwrap();
    let mut w = node.open_write(OpenOptions { write: true, ..Default::default() }).unwrap();
    let payload = vec![7u8; (block_size as usize) * 3];
    w.write(&payload).unwrap();
    w.flush().unwrap();
    assert_eq!(node.blockfs_attributes().unwrap().block_count, 3);

    w.truncate(block_size as u64 + 10).unwrap();
    w.flush().unwrap();
    drop(w);

    let attrs = node.blockfs_attributes().unwrap();
    assert_eq!(attrs.content_size, block_size as u64 + 10);
    assert_eq!(attrs.block_count, 2);

    let mut r = node.open_read().unwrap();
    let data = r.read(usize::MAX).unwrap();
    assert_eq!(data.len(), block_size as usize + 10);
}

#[test]
fn directory_enumeration_lists_files_and_folders() {
    let fs = fs();
    fs.open("/docs").unwrap().create_folder().unwrap();
    fs.open("/docs/a.txt").unwrap().create_file(write_opts(), None).unwrap();
    fs.open("/docs/b.txt").unwrap().create_file(write_opts(), None).unwrap();
    fs.open("/docs/sub").unwrap().create_folder().unwrap();

    let mut names: Vec<String> = fs
        .open("/docs")
        .unwrap()
        .list_children()
        .unwrap()
        .iter()
        .map(|c| c.path().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["/docs/a.txt", "/docs/b.txt", "/docs/sub"]);
}

#[test]
fn move_file_to_new_path() {
    let fs = fs();
    let src = fs.open("/src.txt").unwrap();
    let mut w = src.open_write(write_opts()).unwrap();
    w.write(b"payload").unwrap();
    drop(w);

    let dest = fs.open("/dest.txt").unwrap();
    src.rename_to(&dest, MoveOptions::default()).unwrap();

    assert!(!fs.open("/src.txt").unwrap().exists().unwrap());
    let dest = fs.open("/dest.txt").unwrap();
    assert!(dest.exists().unwrap());
    let mut r = dest.open_read().unwrap();
    assert_eq!(r.read(1024).unwrap(), b"payload");
}

#[test]
fn atomic_move_is_always_refused() {
    let fs = fs();
    let src = fs.open("/a.txt").unwrap();
    src.create_file(write_opts(), None).unwrap();
    let dest = fs.open("/b.txt").unwrap();

    let err = src
        .rename_to(&dest, MoveOptions { atomic_move: true, ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, FsError::AtomicMoveNotSupported));
}

#[test]
fn copy_preserves_source_and_duplicates_contents() {
    let fs = fs();
    let src = fs.open("/origin.txt").unwrap();
    let mut w = src.open_write(write_opts()).unwrap();
    w.write(b"copy me").unwrap();
    drop(w);

    let dest = fs.open("/copy.txt").unwrap();
    src.copy_to(&dest, CopyOptions::default()).unwrap();

    assert!(src.exists().unwrap());
    let mut r = fs.open("/copy.txt").unwrap().open_read().unwrap();
    assert_eq!(r.read(1024).unwrap(), b"copy me");
}

#[test]
fn concurrent_creators_race_to_a_single_winner() {
    let fs = fs();
    fs.open("/shared").unwrap().create_folder().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fs = fs.clone();
            thread::spawn(move || fs.open("/shared/race.txt").unwrap().create_file(
                OpenOptions { create: true, write: true, ..Default::default() },
                None,
            ))
        })
        .collect();

    for h in handles {
        h.join().unwrap().unwrap();
    }

    let children = fs.open("/shared").unwrap().list_children().unwrap();
    assert_eq!(children.len(), 1);
}

#[test]
fn create_new_on_existing_file_fails() {
    let fs = fs();
    let node = fs.open("/exists.txt").unwrap();
    node.create_file(write_opts(), None).unwrap();

    let err = node
        .create_file(
            OpenOptions { create: true, create_new: true, write: true, ..Default::default() },
            None,
        )
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(_)));
}

#[test]
fn deleting_a_nonempty_folder_is_refused() {
    let fs = fs();
    fs.open("/full").unwrap().create_folder().unwrap();
    fs.open("/full/child.txt").unwrap().create_file(write_opts(), None).unwrap();

    let err = fs.open("/full").unwrap().delete().unwrap_err();
    assert!(matches!(err, FsError::DirectoryNotEmpty(_)));
}

#[test]
fn only_one_stream_may_be_open_per_file() {
    let fs = fs();
    let node = fs.open("/single.txt").unwrap();
    node.create_file(write_opts(), None).unwrap();

    let first = node.open_read().unwrap();
    let err = node.open_read().unwrap_err();
    assert!(matches!(err, FsError::AccessDenied(_)));
    drop(first);

    // released once the first stream is dropped
    assert!(node.open_read().is_ok());
}

#[test]
fn kind_reports_file_vs_folder() {
    let fs = fs();
    fs.open("/a_folder").unwrap().create_folder().unwrap();
    fs.open("/a_file").unwrap().create_file(write_opts(), None).unwrap();

    assert_eq!(fs.open("/a_folder").unwrap().kind().unwrap(), Some(NodeKind::Folder));
    assert_eq!(fs.open("/a_file").unwrap().kind().unwrap(), Some(NodeKind::File));
    assert_eq!(fs.open("/missing").unwrap().kind().unwrap(), None);
}

#[test]
fn concurrent_delete_and_child_create_never_orphans() {
    // Races a folder delete against a child creation under it. The
    // parent lock makes the two mutually exclusive, so either the
    // delete wins (folder gone, no child ever listed) or the create
    // wins (delete fails with DirectoryNotEmpty); either way the
    // child's key is never left dangling off a deleted parent.
    for _ in 0..20 {
        let fs = fs();
        fs.open("/shelf").unwrap().create_folder().unwrap();

        let deleter = {
            let fs = fs.clone();
            thread::spawn(move || fs.open("/shelf").unwrap().delete())
        };
        let creator = {
            let fs = fs.clone();
            thread::spawn(move || {
                fs.open("/shelf/item.txt")
                    .unwrap()
                    .create_file(write_opts(), None)
            })
        };

        let delete_result = deleter.join().unwrap();
        let create_result = creator.join().unwrap();

        match (delete_result.is_ok(), create_result.is_ok()) {
            (true, true) => panic!("both delete and create succeeded"),
            (true, false) => {
                assert!(!fs.open("/shelf").unwrap().exists().unwrap());
            }
            (false, true) => {
                let children = fs.open("/shelf").unwrap().list_children().unwrap();
                assert_eq!(children.len(), 1);
            }
            (false, false) => panic!("both delete and create failed"),
        }
    }
}

#[test]
fn overlay_only_path_reads_as_an_existing_folder() {
    let overlay = Arc::new(FixedOverlay {
        dirs: HashSet::from(["/shadow".to_string()]),
    });
    let fs = BlockFs::with_overlay(Arc::new(MemoryBackend::new()), Config::default(), overlay);

    let node = fs.open("/shadow").unwrap();
    assert!(node.exists().unwrap());
    assert_eq!(node.kind().unwrap(), Some(NodeKind::Folder));
    assert_eq!(node.list_children().unwrap().len(), 0);

    // nothing was actually persisted to the datastore
    assert!(!fs.open("/not-shadowed").unwrap().exists().unwrap());
}

#[test]
fn concurrent_create_new_has_exactly_one_winner() {
    let fs = fs();
    fs.open("/arena").unwrap().create_folder().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fs = fs.clone();
            thread::spawn(move || {
                fs.open("/arena/prize.txt").unwrap().create_file(
                    OpenOptions {
                        create: true,
                        create_new: true,
                        write: true,
                        ..Default::default()
                    },
                    None,
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in &results {
        if result.is_err() {
            assert!(matches!(result, Err(FsError::AlreadyExists(_))));
        }
    }

    let children = fs.open("/arena").unwrap().list_children().unwrap();
    assert_eq!(children.len(), 1);
}
