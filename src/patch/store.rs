//! Stored patch artifacts.
//!
//! One patch per pull request, keyed by the base repository and the pull
//! request's index: `<root>/patches/<repo_id>/<index>.patch`. Saving the same
//! content twice is harmless and a save always replaces the previous patch.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::persistence::write_atomic;
use crate::types::RepoId;

#[derive(Debug, Clone)]
pub struct PatchStore {
    root: PathBuf,
}

impl PatchStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        PatchStore {
            root: data_dir.into().join("patches"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, repo: RepoId, index: i64) -> PathBuf {
        self.root
            .join(repo.to_string())
            .join(format!("{}.patch", index))
    }

    /// Returns the patch path if a regular file is stored there.
    pub fn locate(&self, repo: RepoId, index: i64) -> Option<PathBuf> {
        let path = self.path(repo, index);
        path.is_file().then_some(path)
    }

    pub fn save(&self, repo: RepoId, index: i64, patch: &[u8]) -> io::Result<PathBuf> {
        let path = self.path(repo, index);
        write_atomic(&path, patch)?;
        debug!(repo = %repo, index, bytes = patch.len(), "saved patch");
        Ok(path)
    }

    /// Deletes the stored patch. A missing patch is not an error.
    pub fn remove(&self, repo: RepoId, index: i64) -> io::Result<()> {
        match std::fs::remove_file(self.path(repo, index)) {
            Ok(()) => {
                debug!(repo = %repo, index, "removed patch");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn load(&self, repo: RepoId, index: i64) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(repo, index)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
