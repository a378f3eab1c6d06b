//! Resolved snapshots of the entities surrounding a pull request.
//!
//! Callers hand the engine fully-loaded, read-only snapshots instead of letting
//! entities fetch their associations on demand mid-algorithm.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CommentId, IssueId, RepoId, UserId};
use super::pull::PullRequest;

/// Id used for the placeholder account that stands in for deleted users.
pub const GHOST_USER_ID: i64 = -1;

/// A user or organization account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_organization: bool,
}

impl User {
    /// The placeholder used when a referenced account no longer exists.
    pub fn ghost() -> Self {
        User {
            id: UserId(GHOST_USER_ID),
            login: "Ghost".to_string(),
            full_name: "Ghost".to_string(),
            email: String::new(),
            is_organization: false,
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.id.0 == GHOST_USER_ID
    }
}

/// Permission level of a user on a repository, ordered from weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    None,
    Read,
    Write,
    Admin,
    Owner,
}

/// Per-repository settings of the pull request unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestsConfig {
    /// Pass `--ignore-whitespace` when testing patches.
    #[serde(default)]
    pub ignore_whitespace_conflicts: bool,
}

/// A branch on which merging is restricted to a whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedBranch {
    pub branch: String,
    #[serde(default)]
    pub merge_whitelist: Vec<UserId>,
}

/// A hosted repository together with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub owner: User,
    pub name: String,

    /// Path to the bare git directory on disk.
    pub path: PathBuf,

    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub fork_of: Option<RepoId>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub pull_config: PullRequestsConfig,
    #[serde(default)]
    pub protected_branches: Vec<ProtectedBranch>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner.login, self.name)
    }

    /// Returns true if `doer` may not merge into `branch`.
    pub fn is_protected_for_merging(&self, branch: &str, doer: &User) -> bool {
        self.protected_branches
            .iter()
            .find(|p| p.branch == branch)
            .is_some_and(|p| !p.merge_whitelist.contains(&doer.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// An issue row. Every pull request owns exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub repo_id: RepoId,
    pub index: i64,
    pub poster: User,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_pull: bool,
    #[serde(default)]
    pub is_closed: bool,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub assignees: Vec<User>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// Returns the matching prefix if the title marks work in progress.
    ///
    /// Prefixes are compared case-insensitively and the title's own casing is
    /// returned.
    pub fn work_in_progress_prefix<'a>(&'a self, prefixes: &[String]) -> Option<&'a str> {
        let upper = self.title.to_uppercase();
        prefixes
            .iter()
            .find(|p| upper.starts_with(&p.to_uppercase()))
            .and_then(|p| self.title.get(..p.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub issue_id: IssueId,
    pub poster: User,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A pull request with every association the engine needs already loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullContext {
    pub pull: PullRequest,
    pub issue: Issue,
    pub base_repo: Repository,

    /// `None` when the head repository has been deleted.
    pub head_repo: Option<Repository>,

    /// Resolved merger; ghost when the account is gone.
    pub merger: Option<User>,
}
