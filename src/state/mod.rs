//! Pull request state: transition rules, storage, and the service that
//! drives status changes.
//!
//! `transitions` is pure; `store` applies writes atomically; `machine`
//! schedules checks and records merges on top of both.

pub mod machine;
pub mod store;
pub mod transitions;

pub use machine::{MachineError, MachineResult, MergeReadiness};
pub use store::{
    Collaborator, MemoryStore, NewPullRow, PullStore, Seed, StoreError, StoreResult,
};
pub use transitions::{
    MergeRecordInput, TransitionError, can_transition, check_transition, validate_merge,
};
