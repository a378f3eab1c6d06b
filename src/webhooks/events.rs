//! Domain events handed to the webhook translator.
//!
//! Business logic writes these to the [`Notifier`](super::Notifier) channel
//! and moves on. Each event carries resolved snapshots of everything the
//! payload needs, so translation never reaches back into the store except to
//! compute access levels.

use crate::types::{Comment, Issue, PullContext, Repository, Review, User};

/// The issue or pull request an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Issue { issue: Issue, repo: Repository },
    Pull(Box<PullContext>),
}

impl Subject {
    pub fn issue(&self) -> &Issue {
        match self {
            Subject::Issue { issue, .. } => issue,
            Subject::Pull(ctx) => &ctx.issue,
        }
    }

    /// The repository the issue lives in; for pull requests, the base.
    pub fn repo(&self) -> &Repository {
        match self {
            Subject::Issue { repo, .. } => repo,
            Subject::Pull(ctx) => &ctx.base_repo,
        }
    }

    pub fn is_pull(&self) -> bool {
        matches!(self, Subject::Pull(_))
    }
}

/// Something that happened and may interest webhook subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    NewIssue {
        issue: Issue,
        repo: Repository,
    },

    NewPullRequest {
        pull: Box<PullContext>,
    },

    TitleChanged {
        subject: Subject,
        doer: User,
        old_title: String,
    },

    ContentChanged {
        subject: Subject,
        doer: User,
        old_body: String,
    },

    AssigneeChanged {
        subject: Subject,
        doer: User,
        assignee: User,
        removed: bool,
    },

    /// The issue was closed or reopened; the subject holds the new state.
    StatusChanged {
        subject: Subject,
        doer: User,
    },

    LabelsUpdated {
        subject: Subject,
        doer: User,
    },

    LabelsCleared {
        subject: Subject,
        doer: User,
    },

    PullMerged {
        pull: Box<PullContext>,
        doer: User,
    },

    /// The head branch moved.
    PullSynchronized {
        pull: Box<PullContext>,
        doer: User,
    },

    /// A review was submitted or its content edited.
    Review {
        pull: Box<PullContext>,
        review: Review,
    },

    CommentCreated {
        subject: Subject,
        comment: Comment,
        doer: User,
    },

    CommentEdited {
        subject: Subject,
        comment: Comment,
        doer: User,
        old_body: String,
    },

    CommentDeleted {
        subject: Subject,
        comment: Comment,
        doer: User,
    },

    Forked {
        old_repo: Repository,
        new_repo: Repository,
        doer: User,
    },

    RepositoryCreated {
        repo: Repository,
        doer: User,
    },

    RepositoryDeleted {
        repo: Repository,
        doer: User,
    },
}

impl DomainEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::NewIssue { .. } => "new_issue",
            DomainEvent::NewPullRequest { .. } => "new_pull_request",
            DomainEvent::TitleChanged { .. } => "title_changed",
            DomainEvent::ContentChanged { .. } => "content_changed",
            DomainEvent::AssigneeChanged { .. } => "assignee_changed",
            DomainEvent::StatusChanged { .. } => "status_changed",
            DomainEvent::LabelsUpdated { .. } => "labels_updated",
            DomainEvent::LabelsCleared { .. } => "labels_cleared",
            DomainEvent::PullMerged { .. } => "pull_merged",
            DomainEvent::PullSynchronized { .. } => "pull_synchronized",
            DomainEvent::Review { .. } => "review",
            DomainEvent::CommentCreated { .. } => "comment_created",
            DomainEvent::CommentEdited { .. } => "comment_edited",
            DomainEvent::CommentDeleted { .. } => "comment_deleted",
            DomainEvent::Forked { .. } => "forked",
            DomainEvent::RepositoryCreated { .. } => "repository_created",
            DomainEvent::RepositoryDeleted { .. } => "repository_deleted",
        }
    }
}
