//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using an
//! `IssueId` where a `PullId` is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(n: i64) -> Self {
                $name(n)
            }
        }
    };
}

numeric_id! {
    /// Database identity of a pull request row.
    PullId
}

numeric_id! {
    /// Database identity of the issue that owns a pull request.
    IssueId
}

numeric_id! {
    /// Database identity of a repository.
    RepoId
}

numeric_id! {
    /// Database identity of a user or organization account.
    UserId
}

numeric_id! {
    /// Database identity of an issue comment.
    CommentId
}

numeric_id! {
    /// Database identity of a review.
    ReviewId
}

/// Error returned when a string is not a full 40-hex-character commit id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid commit id: {0:?}")]
pub struct InvalidSha(pub String);

/// A git commit SHA (40 hex characters, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha(String);

impl Sha {
    /// Length of a full SHA-1 object id in hex.
    pub const LEN: usize = 40;

    /// Parses a full commit id, normalizing to lowercase.
    ///
    /// Surrounding whitespace is trimmed so raw command output can be passed
    /// straight in.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, InvalidSha> {
        let trimmed = s.as_ref().trim();
        if trimmed.len() == Self::LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Sha(trimmed.to_ascii_lowercase()))
        } else {
            Err(InvalidSha(trimmed.to_string()))
        }
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Sha {
    type Error = InvalidSha;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Sha::parse(s)
    }
}

impl From<Sha> for String {
    fn from(sha: Sha) -> Self {
        sha.0
    }
}
