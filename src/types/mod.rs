//! Core domain types for the merge-readiness engine.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod ids;
pub mod pull;
pub mod repo;
pub mod review;

// Re-export commonly used types at the module level
pub use ids::{CommentId, InvalidSha, IssueId, PullId, RepoId, ReviewId, Sha, UserId};
pub use pull::{ConflictedFiles, MAX_CONFLICTED_FILES, MergeRecord, PullRequest, PullStatus};
pub use repo::{
    AccessMode, Comment, GHOST_USER_ID, Issue, Label, ProtectedBranch, PullContext,
    PullRequestsConfig, Repository, User,
};
pub use review::{Review, ReviewType};
