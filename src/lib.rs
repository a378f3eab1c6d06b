//! Pull-request merge-readiness engine.
//!
//! Decides whether each pull request applies cleanly onto its base branch,
//! keeps that answer current as branches move, notices merges made outside
//! the merge action, and announces every transition to webhook subscribers.

pub mod config;
pub mod detector;
pub mod git;
pub mod patch;
pub mod persistence;
pub mod queue;
pub mod retry;
pub mod server;
pub mod service;
pub mod state;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
