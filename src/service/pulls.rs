//! Pull request creation, head synchronization, push handling and merging.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::git::refs::{generate_patch, push_to_base_repo};
use crate::patch::PatchOutcome;
use crate::state::{MachineError, MergeRecordInput, NewPullRow, StoreError};
use crate::types::{
    ConflictedFiles, Issue, PullContext, PullId, PullRequest, PullStatus, RepoId, Sha, User,
    UserId,
};
use crate::webhooks::DomainEvent;

use super::{PullService, ServiceError, ServiceResult};

/// A request to merge `head_repo:head_branch` into `base_repo:base_branch`.
#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub base_repo: RepoId,
    pub base_branch: String,
    pub head_repo: RepoId,
    pub head_branch: String,
    pub poster: User,
    pub title: String,
    pub body: String,

    /// Literal patch to test before the pull request is stored.
    pub patch: Option<Vec<u8>>,
}

/// What a push triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Pull requests whose head moved.
    pub synchronized: usize,
    /// Pull requests found merged into the pushed base branch.
    pub merged: usize,
    /// Pull requests queued for a check because their base moved.
    pub checked: usize,
    pub failed: usize,
}

impl PullService {
    // ─── Creation ───

    /// Create a pull request.
    ///
    /// With a literal patch, the patch is tested before the row is inserted
    /// and a failed test aborts creation and discards the saved patch.
    #[instrument(skip_all, fields(base = %req.base_repo, head = %req.head_repo))]
    pub async fn new_pull_request(&self, req: NewPullRequest) -> ServiceResult<PullRequest> {
        let store = self.store();
        if let Some(existing) =
            store.find_unmerged(req.head_repo, &req.head_branch, req.base_repo, &req.base_branch)
        {
            return Err(StoreError::AlreadyExists {
                existing: existing.id,
            }
            .into());
        }

        let base_repo = store.repo(req.base_repo)?;
        let head_repo = store.repo(req.head_repo)?;
        let index = store.allocate_index(req.base_repo)?;
        let (issue_id, pull_id) = store.allocate_ids();

        let now = Utc::now();
        let issue = Issue {
            id: issue_id,
            repo_id: req.base_repo,
            index,
            poster: req.poster,
            title: req.title,
            body: req.body,
            is_pull: true,
            is_closed: false,
            labels: Vec::new(),
            assignees: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut pull = PullRequest {
            id: pull_id,
            issue_id,
            index,
            head_repo_id: req.head_repo,
            head_branch: req.head_branch,
            base_repo_id: req.base_repo,
            base_branch: req.base_branch,
            status: PullStatus::Checking,
            conflicted_files: ConflictedFiles::new(),
            merge_base: None,
            merged: None,
        };

        let base_id = req.base_repo;
        let patch = req.patch;
        let has_patch = patch.is_some();
        let created = async {
            let outcome = match patch {
                Some(patch) => {
                    let tester = self.machine.tester();
                    tester.patches().save(base_repo.id, index, &patch)?;
                    let ctx = PullContext {
                        pull: pull.clone(),
                        issue: issue.clone(),
                        base_repo,
                        head_repo: Some(head_repo),
                        merger: None,
                    };
                    tester.test(&ctx).await?
                }
                None => PatchOutcome::Skipped,
            };
            let (status, files) = outcome.resolution();
            pull.status = status;
            pull.conflicted_files = files;
            Ok::<_, ServiceError>(store.insert_pull(NewPullRow { issue, pull })?)
        }
        .await;

        let pull = match created {
            Ok(pull) => pull,
            Err(e) => {
                if has_patch
                    && let Err(rm) = self.machine.tester().patches().remove(base_id, index)
                {
                    warn!(repo = %base_id, index, error = %rm, "failed to remove patch of abandoned pull request");
                }
                return Err(e);
            }
        };
        info!(pull = %pull.id, index, status = ?pull.status, "pull request created");

        if let Err(e) = self.push_to_base(pull.id).await {
            warn!(pull = %pull.id, error = %e, "failed to mirror head to base repository");
        }

        match store.context(pull.id) {
            Ok(ctx) => self.machine.notifier().notify(DomainEvent::NewPullRequest {
                pull: Box::new(ctx),
            }),
            Err(e) => warn!(pull = %pull.id, error = %e, "cannot load new pull request for notification"),
        }
        Ok(pull)
    }

    // ─── Head mirroring ───

    /// Recompute the merge-base and regenerate the stored patch from the head.
    #[instrument(skip(self), fields(pull = %id))]
    pub async fn update_patch(&self, id: PullId) -> ServiceResult<()> {
        let ctx = self.store().context(id)?;
        let Some(head_repo) = ctx.head_repo.as_ref() else {
            warn!("head repository is gone, patch left as is");
            return Ok(());
        };

        let remote = format!("tmp-patch-{}", id);
        let refresh = generate_patch(
            self.runner.as_ref(),
            &remote,
            &head_repo.path,
            &ctx.pull.head_branch,
            &ctx.base_repo.path,
            &ctx.pull.base_branch,
        )
        .await?;

        self.store().update_merge_base(id, refresh.merge_base)?;
        self.machine
            .tester()
            .patches()
            .save(ctx.base_repo.id, ctx.pull.index, refresh.patch.as_bytes())?;
        debug!(bytes = refresh.patch.len(), "patch regenerated");
        Ok(())
    }

    /// Mirror the head branch to the pull request's hidden ref in the base
    /// repository.
    pub async fn push_to_base(&self, id: PullId) -> ServiceResult<()> {
        let ctx = self.store().context(id)?;
        let Some(head_repo) = ctx.head_repo.as_ref() else {
            warn!(pull = %id, "head repository is gone, nothing to mirror");
            return Ok(());
        };
        push_to_base_repo(
            self.runner.as_ref(),
            id,
            ctx.pull.index,
            &head_repo.path,
            &ctx.pull.head_branch,
            &ctx.base_repo.path,
        )
        .await?;
        Ok(())
    }

    // ─── Push handling ───

    /// React to `pusher` updating `repo:branch`.
    ///
    /// Pull requests with that head are re-synchronized and re-checked. Pull
    /// requests with that base are checked for a manual merge first. A
    /// failure on one pull request does not stop the others.
    #[instrument(skip_all, fields(repo = %repo, branch = %branch))]
    pub async fn on_push(&self, repo: RepoId, branch: &str, pusher: UserId) -> PushReport {
        let store = self.store();
        let doer = store.user(pusher).unwrap_or_else(User::ghost);
        let mut report = PushReport::default();

        for pull in store.open_pulls_by_head(repo, branch) {
            match self.synchronize(pull.id, &doer).await {
                Ok(()) => report.synchronized += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(pull = %pull.id, error = %e, "failed to synchronize pull request");
                }
            }
        }

        for pull in store.open_pulls_by_base(repo, branch) {
            match self.machine.check_manually_merged(pull.id).await {
                Ok(true) => report.merged += 1,
                Ok(false) => match self.machine.enqueue_check(pull.id).await {
                    Ok(_) => report.checked += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(pull = %pull.id, error = %e, "failed to queue check");
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    warn!(pull = %pull.id, error = %e, "merge detection failed");
                }
            }
        }

        info!(?report, "push handled");
        report
    }

    async fn synchronize(&self, id: PullId, doer: &User) -> ServiceResult<()> {
        self.update_patch(id).await?;
        self.push_to_base(id).await?;
        self.machine.enqueue_check(id).await?;

        let ctx = self.store().context(id)?;
        self.machine.notifier().notify(DomainEvent::PullSynchronized {
            pull: Box::new(ctx),
            doer: doer.clone(),
        });
        Ok(())
    }

    // ─── Merge action ───

    /// Record that `doer` merged the pull request as `commit`.
    #[instrument(skip(self, doer), fields(pull = %id, doer = %doer.login))]
    pub fn merge(&self, id: PullId, doer: &User, commit: Sha) -> ServiceResult<PullRequest> {
        let ctx = self.store().context(id)?;
        if ctx.pull.has_merged() {
            return Err(MachineError::AlreadyMerged.into());
        }
        if ctx
            .base_repo
            .is_protected_for_merging(&ctx.pull.base_branch, doer)
        {
            return Err(MachineError::NotAllowedToMerge {
                reason: "The branch is protected".to_string(),
            }
            .into());
        }
        if !ctx.pull.can_auto_merge() {
            return Err(MachineError::NotMergeable(id).into());
        }

        let input = MergeRecordInput::new(commit, doer.id, Utc::now());
        let merged = self.machine.mark_merged(id, &input, None)?;

        match self.store().context(id) {
            Ok(ctx) => self.machine.notifier().notify(DomainEvent::PullMerged {
                pull: Box::new(ctx),
                doer: doer.clone(),
            }),
            Err(e) => warn!(error = %e, "cannot load merged pull request for notification"),
        }
        Ok(merged)
    }
}
