//! Webhook payload schema.
//!
//! Every payload is `{action, index, issue|pull_request, repository, sender,
//! changes?, review?}` or one of the repository-level shapes below. Field
//! names are part of the subscriber contract; do not rename them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AccessMode, Comment, CommentId, Issue, IssueId, Label, PullContext, PullId, PullStatus,
    RepoId, Repository, User, UserId,
};

/// Event type of a hook delivery, sent in the event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEventType {
    Issues,
    IssueComment,
    PullRequest,
    PullRequestApproved,
    PullRequestComment,
    PullRequestRejected,
    Fork,
    Repository,
}

impl HookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEventType::Issues => "issues",
            HookEventType::IssueComment => "issue_comment",
            HookEventType::PullRequest => "pull_request",
            HookEventType::PullRequestApproved => "pull_request_approved",
            HookEventType::PullRequestComment => "pull_request_comment",
            HookEventType::PullRequestRejected => "pull_request_rejected",
            HookEventType::Fork => "fork",
            HookEventType::Repository => "repository",
        }
    }
}

impl std::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    Opened,
    Edited,
    Closed,
    Reopened,
    Assigned,
    Unassigned,
    LabelUpdated,
    LabelCleared,
    Synchronized,
    Approved,
    Commented,
    Rejected,
    Created,
    Deleted,
}

// ─── Snapshots ───

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: UserId,
    pub login: String,
    pub full_name: String,
    pub email: String,
}

impl From<&User> for ApiUser {
    fn from(user: &User) -> Self {
        ApiUser {
            id: user.id,
            login: user.login.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPermission {
    pub admin: bool,
    pub push: bool,
    pub pull: bool,
}

impl From<AccessMode> for ApiPermission {
    fn from(mode: AccessMode) -> Self {
        ApiPermission {
            admin: mode >= AccessMode::Admin,
            push: mode >= AccessMode::Write,
            pull: mode >= AccessMode::Read,
        }
    }
}

/// Repository snapshot as seen by a viewer with the given access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRepository {
    pub id: RepoId,
    pub owner: ApiUser,
    pub name: String,
    pub full_name: String,
    pub private: bool,
    pub fork: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RepoId>,
    pub default_branch: String,
    pub permissions: ApiPermission,
}

impl ApiRepository {
    pub fn new(repo: &Repository, mode: AccessMode) -> Self {
        ApiRepository {
            id: repo.id,
            owner: ApiUser::from(&repo.owner),
            name: repo.name.clone(),
            full_name: repo.full_name(),
            private: repo.is_private,
            fork: repo.fork_of.is_some(),
            parent_id: repo.fork_of,
            default_branch: repo.default_branch.clone(),
            permissions: mode.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    fn of(issue: &Issue) -> Self {
        if issue.is_closed {
            IssueState::Closed
        } else {
            IssueState::Open
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiIssue {
    pub id: IssueId,
    pub number: i64,
    pub user: ApiUser,
    pub title: String,
    pub body: String,
    pub labels: Vec<Label>,
    pub assignees: Vec<ApiUser>,
    pub state: IssueState,
    pub is_pull: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Issue> for ApiIssue {
    fn from(issue: &Issue) -> Self {
        ApiIssue {
            id: issue.id,
            number: issue.index,
            user: ApiUser::from(&issue.poster),
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels: issue.labels.clone(),
            assignees: issue.assignees.iter().map(ApiUser::from).collect(),
            state: IssueState::of(issue),
            is_pull: issue.is_pull,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        }
    }
}

/// One endpoint of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiBranch {
    /// `owner:branch`, or just the branch when the repository is gone.
    pub label: String,
    #[serde(rename = "ref")]
    pub branch: String,
    pub repo_id: RepoId,
    pub repo: Option<ApiRepository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPullRequest {
    pub id: PullId,
    pub number: i64,
    pub user: ApiUser,
    pub title: String,
    pub body: String,
    pub labels: Vec<Label>,
    pub assignees: Vec<ApiUser>,
    pub state: IssueState,
    pub status: PullStatus,
    /// Omitted while a check is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mergeable: Option<bool>,
    pub conflicted_files: Vec<String>,
    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit_sha: Option<String>,
    pub merged_by: Option<ApiUser>,
    pub merge_base: Option<String>,
    pub head: ApiBranch,
    pub base: ApiBranch,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiPullRequest {
    /// Builds the snapshot; `mode` is the viewer's access to both repositories.
    pub fn new(ctx: &PullContext, mode: AccessMode, wip_prefixes: &[String]) -> Self {
        let pull = &ctx.pull;
        let issue = &ctx.issue;
        let wip = issue.work_in_progress_prefix(wip_prefixes).is_some();
        let mergeable = match pull.status {
            PullStatus::Checking => None,
            PullStatus::Conflict => Some(false),
            PullStatus::Mergeable | PullStatus::ManuallyMerged => Some(!wip),
        };
        let record = pull.merged.as_ref();

        ApiPullRequest {
            id: pull.id,
            number: pull.index,
            user: ApiUser::from(&issue.poster),
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels: issue.labels.clone(),
            assignees: issue.assignees.iter().map(ApiUser::from).collect(),
            state: IssueState::of(issue),
            status: pull.status,
            mergeable,
            conflicted_files: pull.conflicted_files.as_slice().to_vec(),
            merged: pull.has_merged(),
            merged_at: record.map(|m| m.merged_at),
            merge_commit_sha: record.map(|m| m.commit_id.to_string()),
            merged_by: record.map(|_| {
                ApiUser::from(&ctx.merger.clone().unwrap_or_else(User::ghost))
            }),
            merge_base: pull.merge_base.as_ref().map(|s| s.to_string()),
            head: branch(
                ctx.head_repo.as_ref(),
                pull.head_repo_id,
                &pull.head_branch,
                mode,
            ),
            base: branch(
                Some(&ctx.base_repo),
                pull.base_repo_id,
                &pull.base_branch,
                mode,
            ),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        }
    }
}

fn branch(repo: Option<&Repository>, repo_id: RepoId, name: &str, mode: AccessMode) -> ApiBranch {
    ApiBranch {
        label: match repo {
            Some(r) => format!("{}:{}", r.owner.login, name),
            None => name.to_string(),
        },
        branch: name.to_string(),
        repo_id,
        repo: repo.map(|r| ApiRepository::new(r, mode)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiComment {
    pub id: CommentId,
    pub issue_id: IssueId,
    pub user: ApiUser,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for ApiComment {
    fn from(c: &Comment) -> Self {
        ApiComment {
            id: c.id,
            issue_id: c.issue_id,
            user: ApiUser::from(&c.poster),
            body: c.body.clone(),
            created_at: c.created_at,
        }
    }
}

// ─── Payloads ───

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesFrom {
    pub from: String,
}

/// Previous values of edited fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<ChangesFrom>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ChangesFrom>,
}

impl ChangesPayload {
    pub fn title(from: impl Into<String>) -> Self {
        ChangesPayload {
            title: Some(ChangesFrom { from: from.into() }),
            body: None,
        }
    }

    pub fn body(from: impl Into<String>) -> Self {
        ChangesPayload {
            title: None,
            body: Some(ChangesFrom { from: from.into() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    #[serde(rename = "type")]
    pub review_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePayload {
    pub action: HookAction,
    pub index: i64,
    pub issue: ApiIssue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangesPayload>,
    pub repository: ApiRepository,
    pub sender: ApiUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestPayload {
    pub action: HookAction,
    pub index: i64,
    pub pull_request: ApiPullRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangesPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewPayload>,
    pub repository: ApiRepository,
    pub sender: ApiUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommentPayload {
    pub action: HookAction,
    pub issue: ApiIssue,
    pub comment: ApiComment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangesPayload>,
    pub repository: ApiRepository,
    pub sender: ApiUser,
    pub is_pull: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPayload {
    /// The repository that was forked.
    pub forkee: ApiRepository,
    /// The new fork.
    pub repo: ApiRepository,
    pub sender: ApiUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPayload {
    pub action: HookAction,
    pub repository: ApiRepository,
    pub organization: ApiUser,
    pub sender: ApiUser,
}
