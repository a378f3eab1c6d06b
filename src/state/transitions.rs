//! Status transitions and merge-record validation.
//!
//! Pure functions; the store applies them under its write lock.
//!
//! ```text
//!             enqueue                 resolve
//!  Conflict ──────────► Checking ───────────► Conflict | Mergeable
//!  Mergeable ─────────►    │
//!                          │ detector
//!  Conflict | Mergeable ───┴──────────────► ManuallyMerged (terminal)
//! ```
//!
//! A pull request with a merge record is terminal whatever its status.

use chrono::{DateTime, Utc};

use crate::types::{MergeRecord, PullRequest, PullStatus, Sha, UserId};

/// Error returned when a status change or merge is not allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The status change is not an edge of the state machine.
    InvalidTransition { from: PullStatus, to: PullStatus },

    /// The pull request already has a merge record.
    AlreadyMerged,

    /// A merge was requested without one of its required fields.
    IncompleteMergeRecord { missing: &'static str },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition from {:?} to {:?}", from, to)
            }
            TransitionError::AlreadyMerged => write!(f, "pull request is already merged"),
            TransitionError::IncompleteMergeRecord { missing } => {
                write!(f, "incomplete merge record: missing {}", missing)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// Returns true if `from → to` is an edge of the status machine.
///
/// Re-entering `Checking` while already checking is allowed; a second trigger
/// just refreshes the pending check.
pub fn can_transition(from: PullStatus, to: PullStatus) -> bool {
    use PullStatus::*;
    match (from, to) {
        (ManuallyMerged, _) => false,
        (_, Checking) => true,
        (Checking, Conflict | Mergeable) => true,
        (_, ManuallyMerged) => true,
        _ => false,
    }
}

/// Checks that `pull` may move to `to`.
pub fn check_transition(pull: &PullRequest, to: PullStatus) -> Result<(), TransitionError> {
    if pull.has_merged() {
        return Err(TransitionError::AlreadyMerged);
    }
    if !can_transition(pull.status, to) {
        return Err(TransitionError::InvalidTransition {
            from: pull.status,
            to,
        });
    }
    Ok(())
}

/// Inputs to a merge, each of which must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeRecordInput {
    pub commit_id: Option<Sha>,
    pub merger: Option<UserId>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl MergeRecordInput {
    pub fn new(commit_id: Sha, merger: UserId, merged_at: DateTime<Utc>) -> Self {
        MergeRecordInput {
            commit_id: Some(commit_id),
            merger: Some(merger),
            merged_at: Some(merged_at),
        }
    }
}

/// Validates a merge of `pull` and builds its merge record.
///
/// `status` is the status to record alongside the merge, if it changes.
pub fn validate_merge(
    pull: &PullRequest,
    input: &MergeRecordInput,
    status: Option<PullStatus>,
) -> Result<MergeRecord, TransitionError> {
    if pull.has_merged() {
        return Err(TransitionError::AlreadyMerged);
    }

    let commit_id = input
        .commit_id
        .clone()
        .ok_or(TransitionError::IncompleteMergeRecord {
            missing: "merged commit id",
        })?;
    let merger_id = input.merger.ok_or(TransitionError::IncompleteMergeRecord {
        missing: "merger",
    })?;
    let merged_at = input.merged_at.ok_or(TransitionError::IncompleteMergeRecord {
        missing: "merge time",
    })?;

    if let Some(to) = status
        && to != pull.status
        && !can_transition(pull.status, to)
    {
        return Err(TransitionError::InvalidTransition {
            from: pull.status,
            to,
        });
    }

    Ok(MergeRecord {
        commit_id,
        merger_id,
        merged_at,
    })
}
