//! Pull request reviews.

use serde::{Deserialize, Serialize};

use super::ids::{IssueId, ReviewId};
use super::repo::User;

/// Kind of review left on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewType {
    /// Draft review that has not been submitted yet.
    Pending,
    Approve,
    Comment,
    Reject,
}

impl ReviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewType::Pending => "Pending",
            ReviewType::Approve => "Approve",
            ReviewType::Comment => "Comment",
            ReviewType::Reject => "Reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub review_type: ReviewType,
    pub reviewer: User,
    pub issue_id: IssueId,
    #[serde(default)]
    pub content: String,
}
