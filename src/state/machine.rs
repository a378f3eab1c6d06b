//! The merge-readiness state machine service.
//!
//! Owns every write to a pull request's status. Checks are scheduled through
//! a [`UniqueQueue`] keyed by pull request id, so any number of triggers for
//! one pull request collapse into a single patch test, and a result is only
//! written if no newer check was scheduled while it ran.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::detector::{DetectError, MergeDetector};
use crate::patch::{PatchError, PatchTester};
use crate::queue::{Enqueued, UniqueQueue};
use crate::retry::RetryConfig;
use crate::types::{PullId, PullRequest, PullStatus};
use crate::webhooks::{DomainEvent, Notifier};

use super::store::{PullStore, StoreError};
use super::transitions::{MergeRecordInput, TransitionError};

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("pull request is already merged")]
    AlreadyMerged,

    #[error("incomplete merge record: missing {missing}")]
    IncompleteMergeRecord { missing: &'static str },

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: PullStatus, to: PullStatus },

    /// The doer may not merge into the base branch.
    #[error("{reason}")]
    NotAllowedToMerge { reason: String },

    #[error("pull request {0} is not mergeable")]
    NotMergeable(PullId),

    /// The pull request is merged; no more checks run for it.
    #[error("pull request {0} is already finished")]
    Finished(PullId),

    #[error("check queue is shut down")]
    QueueClosed,

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl From<TransitionError> for MachineError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyMerged => MachineError::AlreadyMerged,
            TransitionError::IncompleteMergeRecord { missing } => {
                MachineError::IncompleteMergeRecord { missing }
            }
            TransitionError::InvalidTransition { from, to } => {
                MachineError::InvalidTransition { from, to }
            }
        }
    }
}

impl From<StoreError> for MachineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transition(t) => t.into(),
            other => MachineError::Store(other),
        }
    }
}

pub type MachineResult<T> = Result<T, MachineError>;

/// Schedules patch tests and applies their results and merges.
///
/// Constructed once at startup and shared as `Arc<MergeReadiness>`.
pub struct MergeReadiness {
    store: Arc<dyn PullStore>,
    tester: Arc<PatchTester>,
    detector: Arc<MergeDetector>,
    queue: UniqueQueue<PullId>,
    notifier: Notifier,
    retry: RetryConfig,
    /// Consecutive fatal patch test failures per pull request.
    failures: Mutex<HashMap<PullId, u32>>,
    retries: TaskTracker,
    shutdown: CancellationToken,
}

impl MergeReadiness {
    /// `retry.max_retries` bounds automatic re-checks after fatal failures.
    pub fn new(
        store: Arc<dyn PullStore>,
        tester: Arc<PatchTester>,
        detector: Arc<MergeDetector>,
        notifier: Notifier,
        queue_length: usize,
        retry: RetryConfig,
    ) -> Self {
        MergeReadiness {
            store,
            tester,
            detector,
            queue: UniqueQueue::new("pull_requests", queue_length),
            notifier,
            retry,
            failures: Mutex::new(HashMap::new()),
            retries: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PullStore> {
        &self.store
    }

    pub fn tester(&self) -> &Arc<PatchTester> {
        &self.tester
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Returns true while a check for `id` is queued or running.
    pub fn exist(&self, id: PullId) -> bool {
        self.queue.exist(&id)
    }

    pub fn failure_count(&self, id: PullId) -> u32 {
        self.failures_lock().get(&id).copied().unwrap_or(0)
    }

    fn failures_lock(&self) -> std::sync::MutexGuard<'_, HashMap<PullId, u32>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Checks ───

    /// Set the pull request to `Checking` and schedule a patch test.
    ///
    /// Returns once the check is queued, not when it finishes. Waits only if
    /// the queue is at capacity.
    pub async fn enqueue_check(self: &Arc<Self>, id: PullId) -> MachineResult<Enqueued> {
        let pull = self.store.pull(id)?;
        if pull.is_finished() {
            return Err(MachineError::Finished(id));
        }

        let store = Arc::clone(&self.store);
        let machine = Arc::clone(self);
        let enqueued = self
            .queue
            .add(
                id,
                move || match store.set_checking(id) {
                    Ok(true) => {}
                    Ok(false) => debug!(pull = %id, "finished while queueing, status left alone"),
                    Err(e) => warn!(pull = %id, error = %e, "failed to set checking status"),
                },
                move || async move { machine.run_check(id).await },
            )
            .await;

        debug!(pull = %id, ?enqueued, "check requested");
        match enqueued {
            Enqueued::Closed => Err(MachineError::QueueClosed),
            other => Ok(other),
        }
    }

    /// One queued patch test. Errors end here; they are logged and retried.
    #[instrument(skip(self), fields(pull = %id))]
    async fn run_check(self: Arc<Self>, id: PullId) {
        let ctx = match self.store.context(id) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "cannot load pull request for check");
                return;
            }
        };
        if ctx.pull.is_finished() {
            debug!("pull request finished before its check ran");
            return;
        }

        match self.tester.test(&ctx).await {
            Ok(outcome) => {
                self.failures_lock().remove(&id);
                let (status, files) = outcome.resolution();
                self.resolve(id, status, files);
            }
            Err(e) => {
                warn!(error = %e, "patch test failed, status left at checking");
                self.schedule_retry(id);
            }
        }
    }

    /// Publish a check result unless a newer check is pending.
    fn resolve(&self, id: PullId, status: PullStatus, files: crate::types::ConflictedFiles) {
        let store = &self.store;
        match self
            .queue
            .commit_if_latest(&id, || store.resolve_check(id, status, files))
        {
            None => debug!(pull = %id, "newer check pending, result discarded"),
            Some(Ok(true)) => info!(pull = %id, ?status, "check resolved"),
            Some(Ok(false)) => debug!(pull = %id, "no longer checking, result discarded"),
            Some(Err(e)) => warn!(pull = %id, error = %e, "failed to record check result"),
        }
    }

    fn schedule_retry(self: &Arc<Self>, id: PullId) {
        let attempt = {
            let mut failures = self.failures_lock();
            let count = failures.entry(id).or_insert(0);
            *count += 1;
            *count
        };
        if attempt > self.retry.max_retries {
            warn!(pull = %id, attempt, "giving up automatic re-checks until the next trigger");
            return;
        }

        let delay = self.retry.delay_for_attempt(attempt - 1);
        debug!(pull = %id, attempt, ?delay, "re-check scheduled");
        let machine = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        self.retries.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
            match machine.enqueue_check(id).await {
                Ok(_) | Err(MachineError::Finished(_)) | Err(MachineError::QueueClosed) => {}
                Err(e) => warn!(pull = %id, error = %e, "automatic re-check failed"),
            }
        });
    }

    // ─── Merges ───

    /// Record a merge: closes the issue and writes the merge record together.
    ///
    /// `status` is written alongside when given. Nothing changes on error.
    pub fn mark_merged(
        &self,
        id: PullId,
        input: &MergeRecordInput,
        status: Option<PullStatus>,
    ) -> MachineResult<PullRequest> {
        let merged = self.store.commit_merge(id, input, status)?;
        self.failures_lock().remove(&id);
        info!(
            pull = %id,
            commit = %merged.merged.as_ref().map(|m| m.commit_id.short()).unwrap_or_default(),
            "merge recorded"
        );
        Ok(merged)
    }

    /// Detect a merge made outside the merge action and record it.
    ///
    /// Returns true if the pull request was found merged. The merger is the
    /// account owning the merge commit's author email, falling back to the
    /// base repository's owner.
    #[instrument(skip(self), fields(pull = %id))]
    pub async fn check_manually_merged(&self, id: PullId) -> MachineResult<bool> {
        let ctx = self.store.context(id)?;
        if ctx.pull.has_merged() {
            return Ok(false);
        }

        let Some(commit) = self.detector.find_merge_commit(&ctx).await? else {
            return Ok(false);
        };

        let merger = self
            .store
            .user_by_email(&commit.author_email)
            .unwrap_or_else(|| ctx.base_repo.owner.clone());
        let input = MergeRecordInput::new(commit.sha, merger.id, commit.authored_at);
        self.mark_merged(id, &input, Some(PullStatus::ManuallyMerged))?;
        info!(merger = %merger.login, "pull request was merged manually");

        match self.store.context(id) {
            Ok(merged) => self.notifier.notify(DomainEvent::PullMerged {
                pull: Box::new(merged),
                doer: merger,
            }),
            Err(e) => warn!(error = %e, "cannot load merged pull request for notification"),
        }
        Ok(true)
    }

    // ─── Shutdown ───

    /// Stop accepting checks, cancel pending re-checks, and wait for running
    /// checks to finish.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        self.retries.close();
        self.queue.drain().await;
        self.retries.wait().await;
        info!("check queue drained");
    }
}
