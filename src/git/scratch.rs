//! Disposable git index files.
//!
//! A patch test primes an index from the base branch's tree and dry-applies a
//! patch against it. Each attempt gets its own directory under the scratch
//! root; the directory and the index inside it are removed when the
//! [`ScratchIndex`] is dropped, whatever the outcome of the attempt.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::GitResult;

/// File name of the index inside the scratch directory.
const INDEX_FILE_NAME: &str = "index";

#[derive(Debug)]
pub struct ScratchIndex {
    dir: TempDir,
    index: PathBuf,
}

impl ScratchIndex {
    /// Creates a fresh scratch directory under `root`.
    ///
    /// The index file itself does not exist yet; `git read-tree` creates it.
    pub fn create(root: &Path, label: &str) -> GitResult<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", label))
            .tempdir_in(root)?;
        let index = dir.path().join(INDEX_FILE_NAME);
        Ok(ScratchIndex { dir, index })
    }

    pub fn index_path(&self) -> &Path {
        &self.index
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
