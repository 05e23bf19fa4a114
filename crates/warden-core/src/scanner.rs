//! Flat, depth-first watch lists for directory trees.

use std::fs;
use std::path::Path;

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::backup_store::BackupStore;
use crate::error::SnapshotError;
use crate::model::{Directory, ObjectKind, WatchedObject};

/// Snapshot every descendant of `root`, parents before their children and
/// siblings in file-name order. The root itself is not included.
///
/// Entries that cannot be snapshotted are skipped; an unreadable
/// subdirectory is skipped together with everything below it. The backup
/// root is never enumerated.
pub fn enumerate(store: &BackupStore, root: &Path, recursive: bool) -> Vec<WatchedObject> {
    let mut entries = Vec::new();
    let backup_root = store.root().to_path_buf();
    let backup_canonical = fs::canonicalize(&backup_root).ok();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| !is_backup_root(e, &backup_root, backup_canonical.as_deref()));

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot read directory entry");
                continue;
            }
        };
        let kind = if entry.file_type().is_dir() {
            ObjectKind::Directory
        } else {
            ObjectKind::Content
        };
        let path = entry.path();
        match store.snapshot(path.display().to_string(), path, kind) {
            Ok(obj) => entries.push(obj),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                if kind == ObjectKind::Directory {
                    walker.skip_current_dir();
                }
            }
        }
    }
    entries
}

/// The walk may spell paths differently from the store (relative roots,
/// `..`, symlinks), so directories are also compared after resolution.
fn is_backup_root(entry: &DirEntry, backup_root: &Path, canonical: Option<&Path>) -> bool {
    if entry.path().starts_with(backup_root) {
        return true;
    }
    match canonical {
        Some(canonical) if entry.file_type().is_dir() => fs::canonicalize(entry.path())
            .map(|p| p == canonical)
            .unwrap_or(false),
        _ => false,
    }
}

/// Snapshot `root`'s own marker and then its descendants.
pub fn capture_directory(
    store: &BackupStore,
    name: impl Into<String>,
    root: &Path,
    recursive: bool,
) -> Result<Directory, SnapshotError> {
    let marker = store.snapshot(root.display().to_string(), root, ObjectKind::Directory)?;
    let mut entries = vec![marker];
    entries.extend(enumerate(store, root, recursive));
    Ok(Directory::new(name.into(), root.to_path_buf(), recursive, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::NoAttributes;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn non_recursive_scan_stays_at_top_level() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("a"), b"a").unwrap();
        fs::write(tree.join("sub/b"), b"b").unwrap();
        let store = BackupStore::new(dir.path().join("backups"), None, Arc::new(NoAttributes));
        store.prepare().unwrap();

        let entries = enumerate(&store, &tree, false);
        let paths: Vec<_> = entries.iter().map(|e| e.path().to_path_buf()).collect();
        assert_eq!(paths, vec![tree.join("a"), tree.join("sub")]);
    }

    #[test]
    fn backup_root_inside_tree_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"a").unwrap();
        let store = BackupStore::new(dir.path().join(".warden"), None, Arc::new(NoAttributes));
        store.prepare().unwrap();

        let entries = enumerate(&store, dir.path(), true);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path(), dir.path().join("a"));
    }

    #[test]
    fn backup_root_spelled_differently_is_skipped() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("a"), b"a").unwrap();
        let store = BackupStore::new(tree.join("sub/../.warden"), None, Arc::new(NoAttributes));
        store.prepare().unwrap();
        store.snapshot("a", tree.join("a"), ObjectKind::Content).unwrap();

        let dir_obj = capture_directory(&store, "tree", &tree, true).unwrap();
        let paths: Vec<_> = dir_obj.entries().iter().map(|e| e.path().to_path_buf()).collect();
        assert_eq!(paths, vec![tree.clone(), tree.join("a"), tree.join("sub")]);
    }
}
