//! Pull request storage.
//!
//! [`PullStore`] is the engine's view of the relational store: it hands out
//! fully-resolved read-only snapshots and applies each status or merge write
//! as one atomic unit. [`MemoryStore`] keeps everything in memory and can be
//! seeded from a JSON file.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{
    AccessMode, ConflictedFiles, Issue, IssueId, PullContext, PullId, PullRequest, PullStatus,
    RepoId, Repository, Review, ReviewId, ReviewType, Sha, User, UserId,
};

use super::transitions::{MergeRecordInput, TransitionError, check_transition, validate_merge};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pull request {0} not found")]
    PullNotFound(PullId),

    #[error("issue {0} not found")]
    IssueNotFound(IssueId),

    #[error("repository {0} not found")]
    RepoNotFound(RepoId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("review {0} not found")]
    ReviewNotFound(ReviewId),

    /// An open, unmerged pull request already covers the same branches.
    #[error("pull request {existing} already exists for these branches")]
    AlreadyExists { existing: PullId },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A pull request about to be inserted together with its issue.
#[derive(Debug, Clone)]
pub struct NewPullRow {
    pub issue: Issue,
    pub pull: PullRequest,
}

/// Storage for pull requests and the entities they reference.
///
/// Every write method is atomic: it validates and applies all of its changes
/// or none of them.
pub trait PullStore: Send + Sync {
    fn pull(&self, id: PullId) -> StoreResult<PullRequest>;

    fn issue(&self, id: IssueId) -> StoreResult<Issue>;

    fn repo(&self, id: RepoId) -> StoreResult<Repository>;

    fn user(&self, id: UserId) -> Option<User>;

    fn user_by_email(&self, email: &str) -> Option<User>;

    /// The pull request with its issue, repositories and merger resolved.
    ///
    /// A deleted head repository resolves to `None`; a deleted merger to the
    /// ghost user.
    fn context(&self, id: PullId) -> StoreResult<PullContext>;

    fn access_mode(&self, user: &User, repo: &Repository) -> AccessMode;

    /// Reserves the next issue/pull index in `repo`.
    fn allocate_index(&self, repo: RepoId) -> StoreResult<i64>;

    /// Reserves ids for a new issue and pull request.
    fn allocate_ids(&self) -> (IssueId, PullId);

    /// Inserts a pull request and its issue.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if an open unmerged pull
    /// request has the same head and base.
    fn insert_pull(&self, row: NewPullRow) -> StoreResult<PullRequest>;

    /// The open unmerged pull request with these endpoints, if any.
    fn find_unmerged(
        &self,
        head_repo: RepoId,
        head_branch: &str,
        base_repo: RepoId,
        base_branch: &str,
    ) -> Option<PullRequest>;

    /// Open unmerged pull requests whose head is `repo:branch`.
    fn open_pulls_by_head(&self, repo: RepoId, branch: &str) -> Vec<PullRequest>;

    /// Open unmerged pull requests whose base is `repo:branch`.
    fn open_pulls_by_base(&self, repo: RepoId, branch: &str) -> Vec<PullRequest>;

    /// Moves the pull request to `Checking` and clears its conflict list.
    ///
    /// Returns false without writing if the pull request is finished.
    fn set_checking(&self, id: PullId) -> StoreResult<bool>;

    /// Records a patch test verdict if the pull request is still `Checking`.
    ///
    /// Returns false without writing otherwise, e.g. when it was merged while
    /// the test ran.
    fn resolve_check(
        &self,
        id: PullId,
        status: PullStatus,
        files: ConflictedFiles,
    ) -> StoreResult<bool>;

    /// Closes the issue and writes the merge record, plus `status` if given.
    fn commit_merge(
        &self,
        id: PullId,
        input: &MergeRecordInput,
        status: Option<PullStatus>,
    ) -> StoreResult<PullRequest>;

    fn update_merge_base(&self, id: PullId, merge_base: Sha) -> StoreResult<()>;

    /// Records a submitted review on an issue.
    fn insert_review(
        &self,
        issue: IssueId,
        review_type: ReviewType,
        reviewer: User,
        content: String,
    ) -> StoreResult<Review>;

    fn update_review_content(&self, id: ReviewId, content: String) -> StoreResult<Review>;
}

/// Explicit permission grant on a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collaborator {
    pub repo: RepoId,
    pub user: UserId,
    pub mode: AccessMode,
}

/// Initial content of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub pulls: Vec<PullRequest>,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    users: BTreeMap<UserId, User>,
    repos: BTreeMap<RepoId, Repository>,
    issues: BTreeMap<IssueId, Issue>,
    pulls: BTreeMap<PullId, PullRequest>,
    collaborators: HashMap<(RepoId, UserId), AccessMode>,
    reviews: BTreeMap<ReviewId, Review>,
    next_index: HashMap<RepoId, i64>,
    next_issue_id: i64,
    next_pull_id: i64,
    next_review_id: i64,
}

impl Tables {
    fn pull(&self, id: PullId) -> StoreResult<&PullRequest> {
        self.pulls.get(&id).ok_or(StoreError::PullNotFound(id))
    }

    fn pull_mut(&mut self, id: PullId) -> StoreResult<&mut PullRequest> {
        self.pulls.get_mut(&id).ok_or(StoreError::PullNotFound(id))
    }

    fn is_open(&self, pull: &PullRequest) -> bool {
        !pull.has_merged()
            && self
                .issues
                .get(&pull.issue_id)
                .is_some_and(|issue| !issue.is_closed)
    }

    fn open_pulls<'a>(
        &'a self,
        matches: impl Fn(&PullRequest) -> bool + 'a,
    ) -> impl Iterator<Item = &'a PullRequest> + 'a {
        self.pulls
            .values()
            .filter(move |p| matches(p) && self.is_open(p))
    }
}

/// In-memory [`PullStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let mut tables = Tables::default();
        for user in seed.users {
            tables.users.insert(user.id, user);
        }
        for repo in seed.repos {
            tables.users.entry(repo.owner.id).or_insert(repo.owner.clone());
            tables.repos.insert(repo.id, repo);
        }
        for issue in seed.issues {
            let next = tables.next_index.entry(issue.repo_id).or_insert(0);
            *next = (*next).max(issue.index);
            tables.next_issue_id = tables.next_issue_id.max(issue.id.0);
            tables.issues.insert(issue.id, issue);
        }
        for pull in seed.pulls {
            tables.next_pull_id = tables.next_pull_id.max(pull.id.0);
            tables.pulls.insert(pull.id, pull);
        }
        for c in seed.collaborators {
            tables.collaborators.insert((c.repo, c.user), c.mode);
        }
        MemoryStore {
            tables: RwLock::new(tables),
        }
    }

    /// Loads a JSON [`Seed`] from `path`.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let bytes = std::fs::read(path)?;
        let seed: Seed = serde_json::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            repos = seed.repos.len(),
            pulls = seed.pulls.len(),
            "loaded seed"
        );
        Ok(Self::from_seed(seed))
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_user(&self, user: User) {
        self.write().users.insert(user.id, user);
    }

    pub fn insert_repo(&self, repo: Repository) {
        let mut tables = self.write();
        tables.users.entry(repo.owner.id).or_insert(repo.owner.clone());
        tables.repos.insert(repo.id, repo);
    }

    pub fn remove_repo(&self, id: RepoId) {
        self.write().repos.remove(&id);
    }

    pub fn remove_user(&self, id: UserId) {
        self.write().users.remove(&id);
    }

    pub fn grant(&self, repo: RepoId, user: UserId, mode: AccessMode) {
        self.write().collaborators.insert((repo, user), mode);
    }

    /// Replaces an issue row wholesale.
    pub fn put_issue(&self, issue: Issue) {
        self.write().issues.insert(issue.id, issue);
    }

    pub fn remove_issue(&self, id: IssueId) {
        self.write().issues.remove(&id);
    }
}

impl PullStore for MemoryStore {
    fn pull(&self, id: PullId) -> StoreResult<PullRequest> {
        self.read().pull(id).cloned()
    }

    fn issue(&self, id: IssueId) -> StoreResult<Issue> {
        self.read()
            .issues
            .get(&id)
            .cloned()
            .ok_or(StoreError::IssueNotFound(id))
    }

    fn repo(&self, id: RepoId) -> StoreResult<Repository> {
        self.read()
            .repos
            .get(&id)
            .cloned()
            .ok_or(StoreError::RepoNotFound(id))
    }

    fn user(&self, id: UserId) -> Option<User> {
        self.read().users.get(&id).cloned()
    }

    fn user_by_email(&self, email: &str) -> Option<User> {
        if email.is_empty() {
            return None;
        }
        self.read()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    fn context(&self, id: PullId) -> StoreResult<PullContext> {
        let tables = self.read();
        let pull = tables.pull(id)?.clone();
        let issue = tables
            .issues
            .get(&pull.issue_id)
            .cloned()
            .ok_or(StoreError::IssueNotFound(pull.issue_id))?;
        let base_repo = tables
            .repos
            .get(&pull.base_repo_id)
            .cloned()
            .ok_or(StoreError::RepoNotFound(pull.base_repo_id))?;
        let head_repo = tables.repos.get(&pull.head_repo_id).cloned();
        let merger = pull.merged.as_ref().map(|record| {
            tables
                .users
                .get(&record.merger_id)
                .cloned()
                .unwrap_or_else(User::ghost)
        });

        Ok(PullContext {
            pull,
            issue,
            base_repo,
            head_repo,
            merger,
        })
    }

    fn access_mode(&self, user: &User, repo: &Repository) -> AccessMode {
        if user.id == repo.owner.id {
            return AccessMode::Owner;
        }
        let granted = self
            .read()
            .collaborators
            .get(&(repo.id, user.id))
            .copied();
        match granted {
            Some(mode) => mode,
            None if repo.is_private => AccessMode::None,
            None => AccessMode::Read,
        }
    }

    fn allocate_index(&self, repo: RepoId) -> StoreResult<i64> {
        let mut tables = self.write();
        if !tables.repos.contains_key(&repo) {
            return Err(StoreError::RepoNotFound(repo));
        }
        let next = tables.next_index.entry(repo).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn allocate_ids(&self) -> (IssueId, PullId) {
        let mut tables = self.write();
        tables.next_issue_id += 1;
        tables.next_pull_id += 1;
        (IssueId(tables.next_issue_id), PullId(tables.next_pull_id))
    }

    fn insert_pull(&self, row: NewPullRow) -> StoreResult<PullRequest> {
        let mut tables = self.write();
        let p = &row.pull;
        if let Some(existing) = tables
            .open_pulls(|o| {
                o.head_repo_id == p.head_repo_id
                    && o.head_branch == p.head_branch
                    && o.base_repo_id == p.base_repo_id
                    && o.base_branch == p.base_branch
            })
            .next()
        {
            return Err(StoreError::AlreadyExists {
                existing: existing.id,
            });
        }

        tables.issues.insert(row.issue.id, row.issue);
        tables.pulls.insert(row.pull.id, row.pull.clone());
        debug!(pull = %row.pull.id, index = row.pull.index, "inserted pull request");
        Ok(row.pull)
    }

    fn find_unmerged(
        &self,
        head_repo: RepoId,
        head_branch: &str,
        base_repo: RepoId,
        base_branch: &str,
    ) -> Option<PullRequest> {
        self.read()
            .open_pulls(|p| {
                p.head_repo_id == head_repo
                    && p.head_branch == head_branch
                    && p.base_repo_id == base_repo
                    && p.base_branch == base_branch
            })
            .next()
            .cloned()
    }

    fn open_pulls_by_head(&self, repo: RepoId, branch: &str) -> Vec<PullRequest> {
        self.read()
            .open_pulls(|p| p.head_repo_id == repo && p.head_branch == branch)
            .cloned()
            .collect()
    }

    fn open_pulls_by_base(&self, repo: RepoId, branch: &str) -> Vec<PullRequest> {
        self.read()
            .open_pulls(|p| p.base_repo_id == repo && p.base_branch == branch)
            .cloned()
            .collect()
    }

    fn set_checking(&self, id: PullId) -> StoreResult<bool> {
        let mut tables = self.write();
        let pull = tables.pull_mut(id)?;
        if pull.is_finished() {
            return Ok(false);
        }
        check_transition(pull, PullStatus::Checking)?;
        pull.status = PullStatus::Checking;
        pull.conflicted_files.clear();
        Ok(true)
    }

    fn resolve_check(
        &self,
        id: PullId,
        status: PullStatus,
        files: ConflictedFiles,
    ) -> StoreResult<bool> {
        let mut tables = self.write();
        let pull = tables.pull_mut(id)?;
        if pull.is_finished() || !pull.is_checking() {
            return Ok(false);
        }
        check_transition(pull, status)?;
        pull.status = status;
        pull.conflicted_files = if status == PullStatus::Conflict {
            files
        } else {
            ConflictedFiles::new()
        };
        Ok(true)
    }

    fn commit_merge(
        &self,
        id: PullId,
        input: &MergeRecordInput,
        status: Option<PullStatus>,
    ) -> StoreResult<PullRequest> {
        let mut tables = self.write();
        let pull = tables.pull(id)?;
        let record = validate_merge(pull, input, status)?;

        // Stage both rows, then apply them together.
        let mut issue = tables
            .issues
            .get(&pull.issue_id)
            .cloned()
            .ok_or(StoreError::IssueNotFound(pull.issue_id))?;
        let mut merged = pull.clone();

        issue.is_closed = true;
        issue.updated_at = Utc::now();
        merged.merged = Some(record);
        if let Some(status) = status {
            merged.status = status;
        }
        if merged.status != PullStatus::Conflict {
            merged.conflicted_files.clear();
        }

        tables.issues.insert(issue.id, issue);
        tables.pulls.insert(id, merged.clone());
        Ok(merged)
    }

    fn update_merge_base(&self, id: PullId, merge_base: Sha) -> StoreResult<()> {
        self.write().pull_mut(id)?.merge_base = Some(merge_base);
        Ok(())
    }

    fn insert_review(
        &self,
        issue: IssueId,
        review_type: ReviewType,
        reviewer: User,
        content: String,
    ) -> StoreResult<Review> {
        let mut tables = self.write();
        if !tables.issues.contains_key(&issue) {
            return Err(StoreError::IssueNotFound(issue));
        }
        tables.next_review_id += 1;
        let review = Review {
            id: ReviewId(tables.next_review_id),
            review_type,
            reviewer,
            issue_id: issue,
            content,
        };
        tables.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    fn update_review_content(&self, id: ReviewId, content: String) -> StoreResult<Review> {
        let mut tables = self.write();
        let review = tables
            .reviews
            .get_mut(&id)
            .ok_or(StoreError::ReviewNotFound(id))?;
        review.content = content;
        Ok(review.clone())
    }
}
