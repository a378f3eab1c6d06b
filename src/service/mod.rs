//! High-level pull request operations.
//!
//! [`PullService`] is what the HTTP layer and other entry points call. It
//! composes the store, the state machine, git plumbing and the notifier; the
//! lower layers never call back up into it.

mod pulls;
mod reviews;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::git::{GitError, GitRunner};
use crate::patch::PatchError;
use crate::state::{MachineError, MergeReadiness, PullStore, StoreError};
use crate::types::{RepoId, UserId};

pub use pulls::{NewPullRequest, PushReport};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Entry point for pull request operations. Share as `Arc<PullService>`.
pub struct PullService {
    machine: Arc<MergeReadiness>,
    runner: Arc<dyn GitRunner>,
    background: TaskTracker,
}

impl PullService {
    pub fn new(machine: Arc<MergeReadiness>, runner: Arc<dyn GitRunner>) -> Self {
        PullService {
            machine,
            runner,
            background: TaskTracker::new(),
        }
    }

    pub fn machine(&self) -> &Arc<MergeReadiness> {
        &self.machine
    }

    fn store(&self) -> &Arc<dyn PullStore> {
        self.machine.store()
    }

    /// Run push handling in the background; [`drain`](Self::drain) waits for it.
    pub fn spawn_push(self: &Arc<Self>, repo: RepoId, branch: String, pusher: UserId) {
        let service = Arc::clone(self);
        self.background.spawn(async move {
            service.on_push(repo, &branch, pusher).await;
        });
    }

    /// Wait for background push handling, then drain the check queue.
    pub async fn drain(&self) {
        self.background.close();
        self.background.wait().await;
        self.machine.drain().await;
        info!("pull service drained");
    }
}
