//! Atomic directory primitives the queue is built on
//!
//! Every function here is safe to call while other processes, possibly on
//! other hosts, mutate the same tree. Renames are only atomic within one
//! filesystem, so the whole store has to live on a single volume. Nothing at
//! runtime can check that; it is a deployment constraint.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use walkdir::{DirEntry, WalkDir};

use crate::error::StoreError;

/// Create `path` and its parents if missing
pub fn ensure_dir(path: &Path) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(path).map_err(|source| StoreError::Provision {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

/// Rename `from` to `to`, replacing anything already at `to`
///
/// Observers see the file at exactly one of the two paths at every instant.
pub fn atomic_move(from: &Path, to: &Path) -> Result<(), StoreError> {
    fs::rename(from, to).map_err(|source| StoreError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// Write `contents` to a freshly named file in `dir` and return its path
///
/// The name starts with `prefix` followed by random characters, so two
/// processes building the same task never collide. The data is synced before
/// returning so a later rename never publishes a partially written record.
pub fn write_new_file(dir: &Path, prefix: &str, contents: &[u8]) -> Result<PathBuf, StoreError> {
    let write_err = |source: io::Error| StoreError::Write {
        path: dir.to_path_buf(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(dir)
        .map_err(write_err)?;
    file.write_all(contents).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;

    // Keep the file past the handle; the caller publishes it with a rename
    file.into_temp_path().keep().map_err(|e| write_err(e.error))
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Remove the file at `path`
///
/// Returns `Ok(false)` if it was already gone. Another node finishing the
/// same task first is expected, so that case is never an error.
pub fn delete(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Delete {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Recursively read every regular file under `dir`
///
/// A best-effort snapshot. Files that vanish before they can be read and
/// sub-directories that disappear (including stale NFS handles) are skipped
/// quietly; any other error is logged and the walk carries on.
pub fn list_files(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    read_files(walk_files(dir, WalkDir::new(dir).min_depth(1).sort_by_file_name()))
}

/// Regular files yielded by `walk`, skipping entries that failed
fn walk_files<I>(root: &Path, walk: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = walkdir::Result<DirEntry>>,
{
    let mut paths = Vec::new();
    for entry in walk {
        match entry {
            Ok(entry) if entry.file_type().is_file() => paths.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => log_walk_error(root, &e),
        }
    }
    paths
}

fn read_files(paths: Vec<PathBuf>) -> Vec<(PathBuf, Vec<u8>)> {
    paths
        .into_iter()
        .filter_map(|path| read_entry(&path).map(|bytes| (path, bytes)))
        .collect()
}

/// Contents of one discovered file, or `None` if it could not be read
fn read_entry(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(
                path = %path.display(),
                "File not found while listing tasks (likely in-flight or completed by another node)"
            );
            None
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Error when reading task file");
            None
        }
    }
}

/// Whether `err` means a directory handle was invalidated by a remote change
pub fn is_stale_handle(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::StaleNetworkFileHandle
}

/// A walk error caused by a directory disappearing under the walker
fn is_vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|io| io.kind() == io::ErrorKind::NotFound || is_stale_handle(io))
}

fn log_walk_error(root: &Path, err: &walkdir::Error) {
    let path = err.path().unwrap_or(root);
    if is_vanished(err) {
        debug!(path = %path.display(), error = %err, "Directory vanished while listing tasks");
    } else {
        error!(path = %path.display(), error = %err, "Error while listing tasks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");
        assert_eq!(ensure_dir(&dir).unwrap(), dir);
        assert_eq!(ensure_dir(&dir).unwrap(), dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn test_ensure_dir_over_file_fails() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let err = ensure_dir(&blocker.join("sub")).unwrap_err();
        assert!(matches!(err, StoreError::Provision { .. }));
    }

    #[test]
    fn test_write_new_file_unique_names() {
        let temp = TempDir::new().unwrap();
        let a = write_new_file(temp.path(), "key", b"one").unwrap();
        let b = write_new_file(temp.path(), "key", b"two").unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("key"));
        assert_eq!(fs::read(&a).unwrap(), b"one");
        assert_eq!(fs::read(&b).unwrap(), b"two");
    }

    #[test]
    fn test_atomic_move_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("from");
        let to = temp.path().join("to");
        fs::write(&from, "new").unwrap();
        fs::write(&to, "old").unwrap();

        atomic_move(&from, &to).unwrap();
        assert!(!exists(&from));
        assert_eq!(fs::read_to_string(&to).unwrap(), "new");
    }

    #[test]
    fn test_atomic_move_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = atomic_move(&temp.path().join("nope"), &temp.path().join("dest")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("task");
        fs::write(&path, "x").unwrap();
        assert!(delete(&path).unwrap());
        assert!(!delete(&path).unwrap());
    }

    #[test]
    fn test_list_files_recurses() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("waiting").join("ab")).unwrap();
        fs::create_dir_all(temp.path().join("running")).unwrap();
        fs::write(temp.path().join("waiting").join("ab").join("ab01"), "1").unwrap();
        fs::write(temp.path().join("waiting").join("cd02"), "2").unwrap();
        fs::write(temp.path().join("running").join("ef03"), "3").unwrap();

        let mut contents: Vec<Vec<u8>> = list_files(temp.path()).into_iter().map(|(_, b)| b).collect();
        contents.sort();
        assert_eq!(contents, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_list_files_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(list_files(&temp.path().join("missing")).is_empty());
    }

    #[test]
    fn test_stale_handle_detection() {
        let stale = io::Error::from(io::ErrorKind::StaleNetworkFileHandle);
        let other = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(is_stale_handle(&stale));
        assert!(!is_stale_handle(&other));
    }

    fn walker(dir: &Path) -> walkdir::IntoIter {
        WalkDir::new(dir).min_depth(1).sort_by_file_name().into_iter()
    }

    #[test]
    fn test_file_removed_between_scan_and_read() {
        let temp = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(temp.path().join(name), name).unwrap();
        }

        let paths = walk_files(temp.path(), walker(temp.path()));
        assert_eq!(paths.len(), 3);
        fs::remove_file(temp.path().join("b")).unwrap();

        let contents: Vec<Vec<u8>> = read_files(paths).into_iter().map(|(_, b)| b).collect();
        assert_eq!(contents, vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_subdirectory_removed_mid_walk() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("a").join("x"), "x").unwrap();
        fs::write(temp.path().join("b").join("y"), "y").unwrap();
        fs::write(temp.path().join("c"), "c").unwrap();

        let mut walk = walker(temp.path());
        let first = walk.next().unwrap().unwrap();
        assert_eq!(first.file_name(), "a");

        // "b" is listed in the root but gone by the time the walker descends
        fs::remove_dir_all(temp.path().join("b")).unwrap();

        let paths = walk_files(temp.path(), walk);
        assert_eq!(paths, vec![temp.path().join("a").join("x"), temp.path().join("c")]);
    }

    #[test]
    fn test_unreadable_entry_is_skipped() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("dir")).unwrap();
        fs::write(temp.path().join("file"), "ok").unwrap();

        // Reading a directory fails with something other than NotFound
        let paths = vec![temp.path().join("dir"), temp.path().join("file")];
        let files = read_files(paths);
        assert_eq!(files, vec![(temp.path().join("file"), b"ok".to_vec())]);
    }

    #[test]
    fn test_walk_continues_after_other_errors() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        fs::create_dir_all(temp.path().join("live")).unwrap();
        fs::write(temp.path().join("live").join("task"), "t").unwrap();

        let broken: Vec<_> = WalkDir::new(blocker.join("sub")).into_iter().collect();
        let missing: Vec<_> = WalkDir::new(temp.path().join("missing")).into_iter().collect();
        assert!(!is_vanished(broken[0].as_ref().unwrap_err()));
        assert!(is_vanished(missing[0].as_ref().unwrap_err()));

        let walk = broken.into_iter().chain(missing).chain(walker(&temp.path().join("live")));
        let paths = walk_files(temp.path(), walk);
        assert_eq!(paths, vec![temp.path().join("live").join("task")]);
    }
}
