//! Patch test engine.
//!
//! Answers "does the pull request's stored patch apply cleanly onto the
//! current base branch?" by dry-applying it against a disposable index
//! primed from the base branch's tree. No working tree or branch is touched.

pub mod conflict;
pub mod engine;
pub mod store;


use thiserror::Error;

use crate::git::GitError;
use crate::types::PullId;

pub use conflict::{ApplyVerdict, CONFLICT_MARKERS, classify_apply, parse_conflicted_files};
pub use engine::{PatchOutcome, PatchTester};
pub use store::PatchStore;

/// Errors that end a patch test attempt without a verdict.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Priming the scratch index or running git failed.
    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// `git apply` failed for a reason that is not a content conflict.
    #[error("patch test for pull request {pull} failed: {stderr}")]
    Apply { pull: PullId, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;
