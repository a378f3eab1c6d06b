//! Domain event → hook task translation.
//!
//! One event produces zero or more [`HookTask`]s, each addressed to a
//! repository. Repository snapshots are filtered by one user's access level
//! on that repository: the issue poster for edits, status changes and
//! reviews, otherwise the acting user.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::state::PullStore;
use crate::types::{AccessMode, PullContext, RepoId, Repository, ReviewType, User};

use super::delivery::HookTask;
use super::events::{DomainEvent, Subject};
use super::payload::{
    ApiComment, ApiIssue, ApiPullRequest, ApiRepository, ApiUser, ChangesPayload, ForkPayload,
    HookAction, HookEventType, IssueCommentPayload, IssuePayload, PullRequestPayload,
    RepositoryPayload, ReviewPayload,
};

#[derive(Debug, Error)]
pub enum TranslateError {
    /// The event lacks data its payload needs.
    #[error("missing {what} for {event} event")]
    MissingAssociation {
        event: &'static str,
        what: &'static str,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TranslateResult<T> = Result<T, TranslateError>;

/// Computes what a user may do on a repository.
pub trait AccessResolver {
    fn access_level(&self, user: &User, repo: &Repository) -> AccessMode;
}

impl<S: PullStore + ?Sized> AccessResolver for S {
    fn access_level(&self, user: &User, repo: &Repository) -> AccessMode {
        self.access_mode(user, repo)
    }
}

/// Builds hook tasks from domain events.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    wip_prefixes: Vec<String>,
}

impl Translator {
    pub fn new(wip_prefixes: Vec<String>) -> Self {
        Translator { wip_prefixes }
    }

    pub fn translate<A: AccessResolver + ?Sized>(
        &self,
        event: &DomainEvent,
        access: &A,
    ) -> TranslateResult<Vec<HookTask>> {
        match event {
            DomainEvent::NewIssue { issue, repo } => {
                let mode = access.access_level(&issue.poster, repo);
                let payload = IssuePayload {
                    action: HookAction::Opened,
                    index: issue.index,
                    issue: ApiIssue::from(issue),
                    changes: None,
                    repository: ApiRepository::new(repo, mode),
                    sender: ApiUser::from(&issue.poster),
                };
                one(repo.id, HookEventType::Issues, &payload)
            }

            DomainEvent::NewPullRequest { pull } => {
                let poster = &pull.issue.poster;
                let mode = access.access_level(poster, &pull.base_repo);
                let payload = self.pull_payload(pull, HookAction::Opened, mode, poster);
                one(pull.base_repo.id, HookEventType::PullRequest, &payload)
            }

            DomainEvent::TitleChanged {
                subject,
                doer,
                old_title,
            } => self.subject_task(
                subject,
                HookAction::Edited,
                Some(ChangesPayload::title(old_title.as_str())),
                &subject.issue().poster,
                doer,
                access,
            ),

            DomainEvent::ContentChanged {
                subject,
                doer,
                old_body,
            } => self.subject_task(
                subject,
                HookAction::Edited,
                Some(ChangesPayload::body(old_body.as_str())),
                &subject.issue().poster,
                doer,
                access,
            ),

            DomainEvent::AssigneeChanged {
                subject,
                doer,
                removed,
                ..
            } => {
                let action = if *removed {
                    HookAction::Unassigned
                } else {
                    HookAction::Assigned
                };
                self.subject_task(subject, action, None, doer, doer, access)
            }

            DomainEvent::StatusChanged { subject, doer } => {
                let action = if subject.issue().is_closed {
                    HookAction::Closed
                } else {
                    HookAction::Reopened
                };
                let poster = &subject.issue().poster;
                self.subject_task(subject, action, None, poster, doer, access)
            }

            DomainEvent::LabelsUpdated { subject, doer } => {
                self.subject_task(subject, HookAction::LabelUpdated, None, doer, doer, access)
            }

            DomainEvent::LabelsCleared { subject, doer } => {
                let poster = &subject.issue().poster;
                self.subject_task(subject, HookAction::LabelCleared, None, poster, doer, access)
            }

            DomainEvent::PullMerged { pull, doer } => {
                if !pull.pull.has_merged() {
                    return Err(TranslateError::MissingAssociation {
                        event: event.kind(),
                        what: "merge record",
                    });
                }
                let mode = access.access_level(doer, &pull.base_repo);
                let payload = self.pull_payload(pull, HookAction::Closed, mode, doer);
                one(pull.base_repo.id, HookEventType::PullRequest, &payload)
            }

            DomainEvent::PullSynchronized { pull, doer } => {
                let mode = access.access_level(doer, &pull.base_repo);
                let payload = self.pull_payload(pull, HookAction::Synchronized, mode, doer);
                one(pull.base_repo.id, HookEventType::PullRequest, &payload)
            }

            DomainEvent::Review { pull, review } => {
                let (event_type, action) = match review.review_type {
                    ReviewType::Approve => (HookEventType::PullRequestApproved, HookAction::Approved),
                    ReviewType::Comment => (HookEventType::PullRequestComment, HookAction::Commented),
                    ReviewType::Reject => (HookEventType::PullRequestRejected, HookAction::Rejected),
                    other => {
                        debug!(review = %review.id, review_type = other.as_str(), "review type has no hook, skipping");
                        return Ok(Vec::new());
                    }
                };
                let mode = access.access_level(&pull.issue.poster, &pull.base_repo);
                let mut payload = self.pull_payload(pull, action, mode, &review.reviewer);
                payload.review = Some(ReviewPayload {
                    review_type: review.review_type.as_str().to_string(),
                    content: review.content.clone(),
                });
                one(pull.base_repo.id, event_type, &payload)
            }

            DomainEvent::CommentCreated {
                subject,
                comment,
                doer,
            } => comment_task(subject, comment, HookAction::Created, None, doer, access),

            DomainEvent::CommentEdited {
                subject,
                comment,
                doer,
                old_body,
            } => comment_task(
                subject,
                comment,
                HookAction::Edited,
                Some(ChangesPayload::body(old_body.as_str())),
                doer,
                access,
            ),

            DomainEvent::CommentDeleted {
                subject,
                comment,
                doer,
            } => comment_task(subject, comment, HookAction::Deleted, None, doer, access),

            DomainEvent::Forked {
                old_repo,
                new_repo,
                doer,
            } => {
                let fork = ForkPayload {
                    forkee: ApiRepository::new(old_repo, access.access_level(doer, old_repo)),
                    repo: ApiRepository::new(new_repo, access.access_level(doer, new_repo)),
                    sender: ApiUser::from(doer),
                };
                let mut tasks = vec![task(old_repo.id, HookEventType::Fork, &fork)?];
                if new_repo.owner.is_organization {
                    tasks.push(repository_task(new_repo, HookAction::Created, doer)?);
                }
                Ok(tasks)
            }

            DomainEvent::RepositoryCreated { repo, doer } => {
                org_repository_tasks(repo, HookAction::Created, doer)
            }

            DomainEvent::RepositoryDeleted { repo, doer } => {
                org_repository_tasks(repo, HookAction::Deleted, doer)
            }
        }
    }

    fn pull_payload(
        &self,
        pull: &PullContext,
        action: HookAction,
        mode: AccessMode,
        sender: &User,
    ) -> PullRequestPayload {
        PullRequestPayload {
            action,
            index: pull.issue.index,
            pull_request: ApiPullRequest::new(pull, mode, &self.wip_prefixes),
            changes: None,
            review: None,
            repository: ApiRepository::new(&pull.base_repo, mode),
            sender: ApiUser::from(sender),
        }
    }

    /// Issue or pull request payload, depending on what the subject is.
    /// Repository snapshots are filtered by `access_user`, which is the
    /// issue poster for edits and status changes and the doer otherwise.
    fn subject_task<A: AccessResolver + ?Sized>(
        &self,
        subject: &Subject,
        action: HookAction,
        changes: Option<ChangesPayload>,
        access_user: &User,
        doer: &User,
        access: &A,
    ) -> TranslateResult<Vec<HookTask>> {
        let repo = subject.repo();
        let mode = access.access_level(access_user, repo);
        match subject {
            Subject::Pull(pull) => {
                let mut payload = self.pull_payload(pull, action, mode, doer);
                payload.changes = changes;
                one(repo.id, HookEventType::PullRequest, &payload)
            }
            Subject::Issue { issue, .. } => {
                let payload = IssuePayload {
                    action,
                    index: issue.index,
                    issue: ApiIssue::from(issue),
                    changes,
                    repository: ApiRepository::new(repo, mode),
                    sender: ApiUser::from(doer),
                };
                one(repo.id, HookEventType::Issues, &payload)
            }
        }
    }
}

fn comment_task<A: AccessResolver + ?Sized>(
    subject: &Subject,
    comment: &crate::types::Comment,
    action: HookAction,
    changes: Option<ChangesPayload>,
    doer: &User,
    access: &A,
) -> TranslateResult<Vec<HookTask>> {
    let repo = subject.repo();
    let payload = IssueCommentPayload {
        action,
        issue: ApiIssue::from(subject.issue()),
        comment: ApiComment::from(comment),
        changes,
        repository: ApiRepository::new(repo, access.access_level(doer, repo)),
        sender: ApiUser::from(doer),
        is_pull: subject.is_pull(),
    };
    one(repo.id, HookEventType::IssueComment, &payload)
}

/// Repository lifecycle hooks only fire for organization-owned repositories.
fn org_repository_tasks(
    repo: &Repository,
    action: HookAction,
    doer: &User,
) -> TranslateResult<Vec<HookTask>> {
    if !repo.owner.is_organization {
        return Ok(Vec::new());
    }
    Ok(vec![repository_task(repo, action, doer)?])
}

fn repository_task(repo: &Repository, action: HookAction, doer: &User) -> TranslateResult<HookTask> {
    let payload = RepositoryPayload {
        action,
        repository: ApiRepository::new(repo, AccessMode::Owner),
        organization: ApiUser::from(&repo.owner),
        sender: ApiUser::from(doer),
    };
    task(repo.id, HookEventType::Repository, &payload)
}

fn task(repo_id: RepoId, event: HookEventType, payload: &impl Serialize) -> TranslateResult<HookTask> {
    Ok(HookTask {
        repo_id,
        event,
        payload: serde_json::to_value(payload)?,
    })
}

fn one(repo_id: RepoId, event: HookEventType, payload: &impl Serialize) -> TranslateResult<Vec<HookTask>> {
    Ok(vec![task(repo_id, event, payload)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_fixture, issue_fixture, repo_fixture, sha, user_fixture};
    use crate::types::{
        Comment, CommentId, IssueId, MergeRecord, PullId, Review, ReviewId, Sha, UserId,
    };
    use chrono::Utc;

    /// Owners get `Owner`, user 3 gets `Write`, everyone else `Read`.
    struct FixedAccess;

    impl AccessResolver for FixedAccess {
        fn access_level(&self, user: &User, repo: &Repository) -> AccessMode {
            if user.id == repo.owner.id {
                AccessMode::Owner
            } else if user.id == UserId(3) {
                AccessMode::Write
            } else {
                AccessMode::Read
            }
        }
    }

    fn translator() -> Translator {
        Translator::new(vec!["WIP:".to_string()])
    }

    fn review(review_type: ReviewType) -> DomainEvent {
        DomainEvent::Review {
            pull: Box::new(context_fixture(PullId(1), 7)),
            review: Review {
                id: ReviewId(9),
                review_type,
                reviewer: user_fixture(3, "bob"),
                issue_id: IssueId(1),
                content: "please split this".to_string(),
            },
        }
    }

    // ─── Reviews ───

    #[test]
    fn rejection_review_produces_one_rejected_payload() {
        let tasks = translator()
            .translate(&review(ReviewType::Reject), &FixedAccess)
            .unwrap();
        assert_eq!(tasks.len(), 1);

        let task = &tasks[0];
        assert_eq!(task.event, HookEventType::PullRequestRejected);
        assert_eq!(task.repo_id, RepoId(1));
        assert_eq!(task.payload["action"], "rejected");
        assert_eq!(task.payload["review"]["type"], "Reject");
        assert_eq!(task.payload["review"]["content"], "please split this");
        assert_eq!(task.payload["index"], 7);
        assert_eq!(task.payload["sender"]["login"], "bob");
        assert_eq!(task.payload["repository"]["permissions"]["push"], false);
        assert_eq!(task.payload["repository"]["permissions"]["pull"], true);
    }

    #[test]
    fn approve_and_comment_reviews_map_to_their_events() {
        let approve = translator()
            .translate(&review(ReviewType::Approve), &FixedAccess)
            .unwrap();
        assert_eq!(approve[0].event, HookEventType::PullRequestApproved);
        assert_eq!(approve[0].payload["action"], "approved");

        let comment = translator()
            .translate(&review(ReviewType::Comment), &FixedAccess)
            .unwrap();
        assert_eq!(comment[0].event, HookEventType::PullRequestComment);
        assert_eq!(comment[0].payload["action"], "commented");
    }

    #[test]
    fn unrecognized_review_type_is_skipped() {
        let tasks = translator()
            .translate(&review(ReviewType::Pending), &FixedAccess)
            .unwrap();
        assert!(tasks.is_empty());
    }

    // ─── Pull requests ───

    #[test]
    fn new_pull_request_is_opened_by_poster() {
        let event = DomainEvent::NewPullRequest {
            pull: Box::new(context_fixture(PullId(1), 2)),
        };
        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        let payload = &tasks[0].payload;
        assert_eq!(tasks[0].event, HookEventType::PullRequest);
        assert_eq!(payload["action"], "opened");
        assert_eq!(payload["sender"]["login"], "alice");
        assert_eq!(payload["pull_request"]["number"], 2);
        assert_eq!(payload["pull_request"]["mergeable"], true);
        assert_eq!(payload["repository"]["permissions"]["push"], false);
        assert!(payload.get("review").is_none());
    }

    #[test]
    fn merged_event_reports_closed_and_merged() {
        let mut ctx = context_fixture(PullId(1), 1);
        ctx.pull.merged = Some(MergeRecord {
            commit_id: Sha::parse(sha('b')).unwrap(),
            merger_id: UserId(100),
            merged_at: Utc::now(),
        });
        ctx.merger = Some(ctx.base_repo.owner.clone());
        let owner = ctx.base_repo.owner.clone();
        let event = DomainEvent::PullMerged {
            pull: Box::new(ctx),
            doer: owner,
        };

        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        let pr = &tasks[0].payload["pull_request"];
        assert_eq!(tasks[0].payload["action"], "closed");
        assert_eq!(pr["merged"], true);
        assert_eq!(pr["merge_commit_sha"], sha('b'));
        assert_eq!(pr["merged_by"]["login"], "owner");
        assert_eq!(tasks[0].payload["repository"]["permissions"]["admin"], true);
    }

    #[test]
    fn merged_event_without_record_fails() {
        let event = DomainEvent::PullMerged {
            pull: Box::new(context_fixture(PullId(1), 1)),
            doer: user_fixture(2, "alice"),
        };
        assert!(matches!(
            translator().translate(&event, &FixedAccess),
            Err(TranslateError::MissingAssociation { what: "merge record", .. })
        ));
    }

    #[test]
    fn title_edit_on_pull_carries_old_title() {
        let event = DomainEvent::TitleChanged {
            subject: Subject::Pull(Box::new(context_fixture(PullId(1), 1))),
            doer: user_fixture(2, "alice"),
            old_title: "Old title".to_string(),
        };
        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        assert_eq!(tasks[0].event, HookEventType::PullRequest);
        assert_eq!(tasks[0].payload["action"], "edited");
        assert_eq!(tasks[0].payload["changes"]["title"]["from"], "Old title");
        assert!(tasks[0].payload["changes"].get("body").is_none());
    }

    #[test]
    fn snapshots_follow_the_poster_not_the_doer() {
        let owner = repo_fixture(RepoId(1), "owner", "repo").owner;
        let t = translator();
        let events = [
            DomainEvent::TitleChanged {
                subject: Subject::Pull(Box::new(context_fixture(PullId(1), 1))),
                doer: owner.clone(),
                old_title: "Old title".to_string(),
            },
            DomainEvent::ContentChanged {
                subject: Subject::Pull(Box::new(context_fixture(PullId(1), 1))),
                doer: owner.clone(),
                old_body: String::new(),
            },
            DomainEvent::StatusChanged {
                subject: issue_subject(true),
                doer: owner.clone(),
            },
            DomainEvent::LabelsCleared {
                subject: issue_subject(false),
                doer: owner.clone(),
            },
        ];
        for event in &events {
            let tasks = t.translate(event, &FixedAccess).unwrap();
            let payload = &tasks[0].payload;
            assert_eq!(payload["sender"]["login"], "owner", "{}", event.kind());
            assert_eq!(payload["repository"]["permissions"]["admin"], false, "{}", event.kind());
            assert_eq!(payload["repository"]["permissions"]["push"], false, "{}", event.kind());
            assert_eq!(payload["repository"]["permissions"]["pull"], true, "{}", event.kind());
        }

        // Assignee changes are filtered by the doer.
        let assigned = DomainEvent::AssigneeChanged {
            subject: issue_subject(false),
            doer: owner,
            assignee: user_fixture(3, "bob"),
            removed: false,
        };
        let tasks = t.translate(&assigned, &FixedAccess).unwrap();
        assert_eq!(tasks[0].payload["repository"]["permissions"]["admin"], true);
    }

    #[test]
    fn review_snapshot_follows_the_pull_poster() {
        let mut event = review(ReviewType::Approve);
        if let DomainEvent::Review { review, .. } = &mut event {
            review.reviewer = repo_fixture(RepoId(1), "owner", "repo").owner;
        }
        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        let payload = &tasks[0].payload;
        assert_eq!(payload["sender"]["login"], "owner");
        assert_eq!(payload["repository"]["permissions"]["admin"], false);
        assert_eq!(payload["pull_request"]["base"]["repo"]["permissions"]["admin"], false);
    }

    // ─── Issues ───

    fn issue_subject(closed: bool) -> Subject {
        let mut issue = issue_fixture(IssueId(5), RepoId(1), 5);
        issue.is_pull = false;
        issue.is_closed = closed;
        Subject::Issue {
            issue,
            repo: repo_fixture(RepoId(1), "owner", "repo"),
        }
    }

    #[test]
    fn status_change_maps_to_closed_or_reopened() {
        let doer = user_fixture(2, "alice");
        for (closed, action) in [(true, "closed"), (false, "reopened")] {
            let event = DomainEvent::StatusChanged {
                subject: issue_subject(closed),
                doer: doer.clone(),
            };
            let tasks = translator().translate(&event, &FixedAccess).unwrap();
            assert_eq!(tasks[0].event, HookEventType::Issues);
            assert_eq!(tasks[0].payload["action"], action);
            assert_eq!(tasks[0].payload["issue"]["state"], if closed { "closed" } else { "open" });
        }
    }

    #[test]
    fn label_and_assignee_actions() {
        let doer = user_fixture(2, "alice");
        let cleared = DomainEvent::LabelsCleared {
            subject: issue_subject(false),
            doer: doer.clone(),
        };
        let unassigned = DomainEvent::AssigneeChanged {
            subject: issue_subject(false),
            doer: doer.clone(),
            assignee: user_fixture(3, "bob"),
            removed: true,
        };
        let t = translator();
        assert_eq!(
            t.translate(&cleared, &FixedAccess).unwrap()[0].payload["action"],
            "label_cleared"
        );
        assert_eq!(
            t.translate(&unassigned, &FixedAccess).unwrap()[0].payload["action"],
            "unassigned"
        );
    }

    #[test]
    fn comment_edit_on_pull() {
        let comment = Comment {
            id: CommentId(11),
            issue_id: IssueId(1),
            poster: user_fixture(2, "alice"),
            body: "new text".to_string(),
            created_at: Utc::now(),
        };
        let event = DomainEvent::CommentEdited {
            subject: Subject::Pull(Box::new(context_fixture(PullId(1), 1))),
            comment,
            doer: user_fixture(2, "alice"),
            old_body: "old text".to_string(),
        };
        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        assert_eq!(tasks[0].event, HookEventType::IssueComment);
        assert_eq!(tasks[0].payload["action"], "edited");
        assert_eq!(tasks[0].payload["is_pull"], true);
        assert_eq!(tasks[0].payload["comment"]["body"], "new text");
        assert_eq!(tasks[0].payload["changes"]["body"]["from"], "old text");
    }

    // ─── Repositories ───

    fn org_repo() -> Repository {
        let mut repo = repo_fixture(RepoId(5), "acme", "tools");
        repo.owner.is_organization = true;
        repo
    }

    #[test]
    fn fork_into_org_also_announces_repository() {
        let old_repo = repo_fixture(RepoId(1), "owner", "repo");
        let mut new_repo = org_repo();
        new_repo.fork_of = Some(old_repo.id);
        let event = DomainEvent::Forked {
            old_repo,
            new_repo,
            doer: user_fixture(3, "bob"),
        };

        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].event, HookEventType::Fork);
        assert_eq!(tasks[0].repo_id, RepoId(1));
        assert_eq!(tasks[0].payload["forkee"]["id"], 1);
        assert_eq!(tasks[0].payload["repo"]["fork"], true);
        assert_eq!(tasks[1].event, HookEventType::Repository);
        assert_eq!(tasks[1].repo_id, RepoId(5));
        assert_eq!(tasks[1].payload["action"], "created");
        assert_eq!(tasks[1].payload["organization"]["login"], "acme");
    }

    #[test]
    fn fork_into_user_account_is_one_task() {
        let event = DomainEvent::Forked {
            old_repo: repo_fixture(RepoId(1), "owner", "repo"),
            new_repo: repo_fixture(RepoId(6), "bob", "repo"),
            doer: user_fixture(3, "bob"),
        };
        assert_eq!(translator().translate(&event, &FixedAccess).unwrap().len(), 1);
    }

    #[test]
    fn forked_repository_snapshot_uses_the_doers_access() {
        let event = DomainEvent::Forked {
            old_repo: repo_fixture(RepoId(1), "owner", "repo"),
            new_repo: org_repo(),
            doer: user_fixture(3, "bob"),
        };
        let tasks = translator().translate(&event, &FixedAccess).unwrap();
        let repo = &tasks[0].payload["repo"]["permissions"];
        assert_eq!(repo["admin"], false);
        assert_eq!(repo["push"], true);
        let forkee = &tasks[0].payload["forkee"]["permissions"];
        assert_eq!(forkee["push"], true);
    }

    #[test]
    fn repository_events_only_for_organizations() {
        let doer = user_fixture(3, "bob");
        let personal = DomainEvent::RepositoryDeleted {
            repo: repo_fixture(RepoId(6), "bob", "scratch"),
            doer: doer.clone(),
        };
        assert!(translator().translate(&personal, &FixedAccess).unwrap().is_empty());

        let org = DomainEvent::RepositoryDeleted {
            repo: org_repo(),
            doer,
        };
        let tasks = translator().translate(&org, &FixedAccess).unwrap();
        assert_eq!(tasks[0].payload["action"], "deleted");
    }

    #[test]
    fn store_resolves_access() {
        let store = crate::test_utils::store_fixture();
        let event = DomainEvent::NewPullRequest {
            pull: Box::new(store.context(PullId(1)).unwrap()),
        };
        let tasks = translator().translate(&event, &store).unwrap();
        assert_eq!(tasks[0].payload["repository"]["permissions"]["pull"], true);
    }
}
