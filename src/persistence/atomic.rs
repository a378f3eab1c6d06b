//! Crash-safe file replacement.
//!
//! Stored patches are overwritten whenever a head branch moves. A reader must
//! see either the old patch or the new one, never a truncated mix, so writes
//! go to a sibling temp file that is fsynced and renamed over the target.
//! The parent directory is fsynced afterwards so the rename itself is durable.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Flushes a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory's entries to disk so creations and renames survive a
/// power loss.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces `path` with `bytes` atomically, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_sibling(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_parents_and_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patches/12/3.patch");

        write_atomic(&path, b"diff --git a/x b/x\n").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"diff --git a/x b/x\n");
    }

    #[test]
    fn overwrite_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.patch");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!temp_sibling(&path).exists());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn temp_sibling_appends_suffix() {
        assert_eq!(
            temp_sibling(Path::new("/data/patches/1/7.patch")),
            PathBuf::from("/data/patches/1/7.patch.tmp")
        );
    }

    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        assert!(fsync_dir(Path::new("/nonexistent/path/that/does/not/exist")).is_err());
    }
}
