//! Pull request types and mergeability state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{IssueId, PullId, RepoId, Sha, UserId};

/// Maximum number of conflicting paths recorded for a pull request.
pub const MAX_CONFLICTED_FILES: usize = 10;

/// Mergeability of a pull request against its base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullStatus {
    /// The patch does not apply cleanly onto the base branch.
    Conflict,

    /// A patch test is scheduled or running.
    Checking,

    /// The patch applies cleanly onto the base branch.
    Mergeable,

    /// The head landed on the base branch outside of the merge action.
    ManuallyMerged,
}

impl PullStatus {
    /// Returns true once no further status transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PullStatus::ManuallyMerged)
    }

    /// Returns true for the two outcomes a patch test can settle on.
    pub fn is_resolved(&self) -> bool {
        matches!(self, PullStatus::Conflict | PullStatus::Mergeable)
    }
}

/// Conflicting file paths reported by a patch test.
///
/// Insertion order is preserved, duplicates are dropped, and at most
/// [`MAX_CONFLICTED_FILES`] paths are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ConflictedFiles(Vec<String>);

impl ConflictedFiles {
    pub fn new() -> Self {
        ConflictedFiles(Vec::new())
    }

    /// Records a path. Returns false if it was a duplicate or the list is full.
    pub fn push(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.is_full() || self.0.contains(&path) {
            return false;
        }
        self.0.push(path);
        true
    }

    pub fn is_full(&self) -> bool {
        self.0.len() >= MAX_CONFLICTED_FILES
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ConflictedFiles {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut files = ConflictedFiles::new();
        for path in iter {
            files.push(path);
        }
        files
    }
}

impl TryFrom<Vec<String>> for ConflictedFiles {
    type Error = std::convert::Infallible;

    fn try_from(paths: Vec<String>) -> Result<Self, Self::Error> {
        Ok(paths.into_iter().collect())
    }
}

impl From<ConflictedFiles> for Vec<String> {
    fn from(files: ConflictedFiles) -> Self {
        files.0
    }
}

/// Who merged a pull request, which commit landed it, and when.
///
/// A pull request either has a complete record or none at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub commit_id: Sha,
    pub merger_id: UserId,
    pub merged_at: DateTime<Utc>,
}

/// A proposed merge of a head branch into a base branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: PullId,
    pub issue_id: IssueId,

    /// Sequential number within the base repository, shared with issues.
    pub index: i64,

    pub head_repo_id: RepoId,
    pub head_branch: String,
    pub base_repo_id: RepoId,
    pub base_branch: String,

    pub status: PullStatus,
    #[serde(default)]
    pub conflicted_files: ConflictedFiles,

    /// Nearest common ancestor of head and base, refreshed when the head moves.
    #[serde(default)]
    pub merge_base: Option<Sha>,

    #[serde(default)]
    pub merged: Option<MergeRecord>,
}

impl PullRequest {
    pub fn has_merged(&self) -> bool {
        self.merged.is_some()
    }

    /// Returns true when neither a check nor a merge can change this pull request.
    pub fn is_finished(&self) -> bool {
        self.has_merged() || self.status.is_terminal()
    }

    pub fn is_checking(&self) -> bool {
        self.status == PullStatus::Checking
    }

    pub fn can_auto_merge(&self) -> bool {
        self.status == PullStatus::Mergeable
    }

    pub fn is_files_conflicted(&self) -> bool {
        !self.conflicted_files.is_empty()
    }

    /// Hidden ref in the base repository mirroring this pull request's head.
    pub fn git_ref_name(&self) -> String {
        format!("refs/pull/{}/head", self.index)
    }

    pub fn is_same_repo(&self) -> bool {
        self.head_repo_id == self.base_repo_id
    }
}
