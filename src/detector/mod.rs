//! Merge detection.
//!
//! Decides whether a pull request's head reached its base branch by some route
//! other than the merge action, e.g. a maintainer merging locally and pushing.
//! Runs entirely inside the base repository using the hidden pull ref.
//!
//! Detection steps:
//! 1. `merge-base --is-ancestor refs/pull/<index>/head <base>`; exit 1 means
//!    not merged.
//! 2. `rev-list --ancestry-path --merges --reverse <head>..<base>`; the oldest
//!    merge commit on the path is the one that landed the head. No merge
//!    commit means the base was fast-forwarded onto the head itself.
//! 3. Read the landing commit's author email and timestamp.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::git::{
    GitError, GitInvocation, GitRunner, RepoWorkingPool, ScratchIndex, is_ancestor, refs,
    run_stdout,
};
use crate::types::{PullContext, Sha};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// `git show` output could not be parsed into commit metadata.
    #[error("malformed commit metadata for {commit}: {output:?}")]
    MalformedCommit { commit: String, output: String },
}

pub type DetectResult<T> = Result<T, DetectError>;

/// The commit through which a pull request landed on its base branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommit {
    pub sha: Sha,
    pub author_email: String,
    pub authored_at: DateTime<Utc>,
}

pub struct MergeDetector {
    runner: Arc<dyn GitRunner>,
    pool: RepoWorkingPool,
    scratch_root: PathBuf,
}

impl MergeDetector {
    pub fn new(
        runner: Arc<dyn GitRunner>,
        pool: RepoWorkingPool,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        MergeDetector {
            runner,
            pool,
            scratch_root: scratch_root.into(),
        }
    }

    /// Find the commit that merged the pull request, if it has been merged.
    ///
    /// Returns `Ok(None)` when the head is not yet on the base branch, and
    /// also when the hidden ref's content is unusable: detection cannot
    /// succeed until the ref is rewritten, so that case is logged rather
    /// than reported.
    #[instrument(skip_all, fields(pull = %ctx.pull.id, repo = %ctx.base_repo.id))]
    pub async fn find_merge_commit(&self, ctx: &PullContext) -> DetectResult<Option<MergeCommit>> {
        let base = &ctx.base_repo;
        let base_branch = ctx.pull.base_branch.as_str();
        let head_ref = refs::hidden_ref(ctx.pull.index);
        let runner = self.runner.as_ref();

        let _slot = self.pool.acquire(base.id).await;
        let scratch = ScratchIndex::create(&self.scratch_root, "merge-detect")?;
        let index = scratch.index_path();

        if !is_ancestor(runner, &base.path, Some(index), &head_ref, base_branch).await? {
            debug!("head is not on the base branch");
            return Ok(None);
        }

        let head_str = run_stdout(
            runner,
            GitInvocation::new(["rev-parse", "--verify", head_ref.as_str()])
                .in_repo(&base.path)
                .with_index(index),
        )
        .await?;
        let head = match head_str.get(..Sha::LEN).map(Sha::parse) {
            Some(Ok(sha)) => sha,
            _ => {
                warn!(reference = %head_ref, content = %head_str, "invalid commit id in hidden ref, ignoring");
                return Ok(None);
            }
        };

        let range = format!("{}..{}", head, base_branch);
        let merges = run_stdout(
            runner,
            GitInvocation::new([
                "rev-list",
                "--ancestry-path",
                "--merges",
                "--reverse",
                range.as_str(),
            ])
            .in_repo(&base.path)
            .with_index(index),
        )
        .await?;

        let landing = match merges.lines().next().and_then(|l| l.get(..Sha::LEN)) {
            Some(first) => Sha::parse(first).map_err(|e| GitError::InvalidSha(e.0))?,
            None => {
                debug!(head = %head.short(), "fast-forwarded, using head commit");
                head
            }
        };

        let commit = self.read_commit(ctx, &landing).await?;
        debug!(commit = %commit.sha.short(), author = %commit.author_email, "found merge commit");
        Ok(Some(commit))
    }

    async fn read_commit(&self, ctx: &PullContext, sha: &Sha) -> DetectResult<MergeCommit> {
        let output = run_stdout(
            self.runner.as_ref(),
            GitInvocation::new(["show", "-s", "--format=%H%x00%ae%x00%at", sha.as_str()])
                .in_repo(&ctx.base_repo.path),
        )
        .await?;
        parse_commit_meta(&output).ok_or_else(|| DetectError::MalformedCommit {
            commit: sha.to_string(),
            output,
        })
    }
}

/// Parses `%H%x00%ae%x00%at` output.
pub fn parse_commit_meta(output: &str) -> Option<MergeCommit> {
    let mut fields = output.trim().split('\0');
    let sha = Sha::parse(fields.next()?).ok()?;
    let author_email = fields.next()?.to_string();
    let seconds: i64 = fields.next()?.trim().parse().ok()?;
    let authored_at = Utc.timestamp_opt(seconds, 0).single()?;
    Some(MergeCommit {
        sha,
        author_email,
        authored_at,
    })
}
