//! Shared test utilities: fixtures, a scripted git runner, a real-git
//! sandbox, and arbitrary generators for property-based testing.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tempfile::TempDir;

use crate::git::{GitError, GitInvocation, GitOutput, GitResult, GitRunner};
use crate::state::{MemoryStore, PullStore};
use crate::types::{
    ConflictedFiles, Issue, IssueId, PullContext, PullId, PullRequest, PullRequestsConfig,
    PullStatus, RepoId, Repository, Sha, User, UserId,
};

// ─── Fixtures ───

/// A 40-character hex string made of one repeated digit.
pub fn sha(c: char) -> String {
    std::iter::repeat_n(c, Sha::LEN).collect()
}

pub fn user_fixture(id: i64, login: &str) -> User {
    User {
        id: UserId(id),
        login: login.to_string(),
        full_name: login.to_string(),
        email: format!("{}@example.com", login),
        is_organization: false,
    }
}

pub fn repo_fixture(id: RepoId, owner: &str, name: &str) -> Repository {
    Repository {
        id,
        owner: user_fixture(id.0 * 100, owner),
        name: name.to_string(),
        path: PathBuf::from(format!("/repos/{}/{}.git", owner, name)),
        is_private: false,
        fork_of: None,
        default_branch: "main".to_string(),
        pull_config: PullRequestsConfig::default(),
        protected_branches: Vec::new(),
    }
}

pub fn issue_fixture(id: IssueId, repo: RepoId, index: i64) -> Issue {
    let at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
    Issue {
        id,
        repo_id: repo,
        index,
        poster: user_fixture(2, "alice"),
        title: format!("Pull request {}", index),
        body: String::new(),
        is_pull: true,
        is_closed: false,
        labels: Vec::new(),
        assignees: Vec::new(),
        created_at: at,
        updated_at: at,
    }
}

/// A pull request from `alice/fork:feature` into `owner/repo:main`.
pub fn pull_fixture(id: PullId, index: i64) -> PullRequest {
    PullRequest {
        id,
        issue_id: IssueId(id.0),
        index,
        head_repo_id: RepoId(2),
        head_branch: "feature".to_string(),
        base_repo_id: RepoId(1),
        base_branch: "main".to_string(),
        status: PullStatus::Mergeable,
        conflicted_files: ConflictedFiles::new(),
        merge_base: None,
        merged: None,
    }
}

pub fn context_fixture(id: PullId, index: i64) -> PullContext {
    let pull = pull_fixture(id, index);
    let mut head_repo = repo_fixture(RepoId(2), "alice", "fork");
    head_repo.fork_of = Some(RepoId(1));
    PullContext {
        issue: issue_fixture(pull.issue_id, pull.base_repo_id, index),
        base_repo: repo_fixture(RepoId(1), "owner", "repo"),
        head_repo: Some(head_repo),
        merger: None,
        pull,
    }
}

/// A store holding `owner/repo` (id 1), its fork `alice/fork` (id 2) and
/// pull request 1 between them, plus users `owner` (100), `alice` (2) and
/// `bob` (3).
pub fn store_fixture() -> MemoryStore {
    let ctx = context_fixture(PullId(1), 1);
    let store = MemoryStore::new();
    store.insert_user(user_fixture(2, "alice"));
    store.insert_user(user_fixture(3, "bob"));
    store.insert_repo(ctx.base_repo);
    let mut fork = ctx.head_repo.unwrap();
    fork.owner = user_fixture(2, "alice");
    store.insert_repo(fork);

    let (issue_id, pull_id) = store.allocate_ids();
    let index = store.allocate_index(RepoId(1)).unwrap();
    assert_eq!((issue_id, pull_id, index), (IssueId(1), PullId(1), 1));
    store
        .insert_pull(crate::state::NewPullRow {
            issue: ctx.issue,
            pull: ctx.pull,
        })
        .unwrap();
    store
}

// ─── Scripted git runner ───

#[derive(Debug, Clone)]
enum Scripted {
    Output(GitOutput),
    SpawnError(String),
}

#[derive(Default)]
struct FakeGitState {
    scripts: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<GitInvocation>,
    delay: Option<Duration>,
}

/// A [`GitRunner`] that answers from per-subcommand scripts.
///
/// Each subcommand has a queue of responses. The front response is consumed
/// per call except the last one, which repeats. Unscripted subcommands
/// succeed with empty output.
#[derive(Default)]
pub struct FakeGit {
    state: Mutex<FakeGitState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, subcommand: &str, response: Scripted) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(subcommand.to_string())
            .or_default()
            .push_back(response);
    }

    /// Succeed with `stdout`.
    pub fn respond(&self, subcommand: &str, stdout: &str) {
        self.push(
            subcommand,
            Scripted::Output(GitOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    /// Exit with `code` and `stderr`.
    pub fn fail(&self, subcommand: &str, code: i32, stderr: &str) {
        self.push(
            subcommand,
            Scripted::Output(GitOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
    }

    /// Fail to run the command at all.
    pub fn spawn_error(&self, subcommand: &str, message: &str) {
        self.push(subcommand, Scripted::SpawnError(message.to_string()));
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<GitInvocation> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, subcommand: &str) -> Vec<GitInvocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.subcommand() == subcommand)
            .collect()
    }

    /// Highest number of calls that were ever running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitRunner for FakeGit {
    async fn run(&self, invocation: &GitInvocation) -> GitResult<GitOutput> {
        let (response, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(invocation.clone());
            let response = match state.scripts.get_mut(invocation.subcommand()) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            (response, state.delay)
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            None => Ok(GitOutput {
                code: Some(0),
                ..Default::default()
            }),
            Some(Scripted::Output(out)) => Ok(out),
            Some(Scripted::SpawnError(msg)) => Err(GitError::Io(std::io::Error::other(msg))),
        }
    }
}

// ─── Real git sandbox ───

/// A bare repository plus a working clone for building history.
pub struct GitSandbox {
    dir: TempDir,
    pub bare: PathBuf,
    pub work: PathBuf,
}

/// Run git synchronously with a clean environment, panicking on failure.
pub fn git_sync(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl GitSandbox {
    /// Creates `repo.git` with one commit on `main` adding `x.txt`.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("repo.git");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::create_dir_all(&work).unwrap();

        git_sync(&bare, &["init", "--bare", "--initial-branch=main"]);
        git_sync(&work, &["init", "--initial-branch=main"]);
        git_sync(&work, &["config", "user.email", "dev@example.com"]);
        git_sync(&work, &["config", "user.name", "Dev"]);
        git_sync(&work, &["config", "commit.gpgsign", "false"]);
        git_sync(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);

        let sandbox = GitSandbox {
            dir,
            bare,
            work,
        };
        sandbox.commit("x.txt", "A\nsecond\nthird\n", "Initial commit");
        sandbox.push("main", "main");
        sandbox
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> String {
        git_sync(&self.work, args)
    }

    pub fn commit(&self, file: &str, content: &str, message: &str) -> String {
        std::fs::write(self.work.join(file), content).unwrap();
        self.git(&["add", file]);
        self.git(&["commit", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn checkout(&self, branch: &str) {
        self.git(&["checkout", branch]);
    }

    pub fn checkout_new(&self, branch: &str, from: &str) {
        self.git(&["checkout", "-b", branch, from]);
    }

    /// Push local `branch` to `target` (branch name or full ref) in the bare repo.
    pub fn push(&self, branch: &str, target: &str) {
        let refspec = if target.starts_with("refs/") {
            format!("{}:{}", branch, target)
        } else {
            format!("{}:refs/heads/{}", branch, target)
        };
        self.git(&["push", "-f", "origin", &refspec]);
    }

    pub fn diff(&self, from: &str, to: &str) -> String {
        let output = std::process::Command::new("git")
            .current_dir(&self.work)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .args(["diff", "-p", "--binary", from, to])
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

// ─── Arbitrary generators ───

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(|s| Sha::parse(s).unwrap())
}

pub fn arb_pull_status() -> impl Strategy<Value = PullStatus> {
    prop_oneof![
        Just(PullStatus::Checking),
        Just(PullStatus::Conflict),
        Just(PullStatus::Mergeable),
        Just(PullStatus::ManuallyMerged),
    ]
}

pub fn arb_path() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.[a-z]{1,3}".prop_map(String::from)
}
