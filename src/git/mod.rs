//! Version-control command execution.
//!
//! Every git operation in the engine goes through the [`GitRunner`] capability
//! so tests can substitute a scripted runner. The production [`ProcessRunner`]
//! spawns the git binary with a clean environment and a per-command timeout.
//!
//! Operations never touch a working tree: they run against a bare git directory
//! (`GIT_DIR`) and, where an index is needed, a disposable one
//! (`GIT_INDEX_FILE`, see [`scratch`]).

pub mod pool;
pub mod refs;
pub mod scratch;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

use crate::types::Sha;

pub use pool::{RepoGuard, RepoWorkingPool};
pub use scratch::ScratchIndex;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command exited unsuccessfully.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Git command did not finish within the configured timeout.
    #[error("git command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    /// Output that should have been a commit id was not.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// IO error (spawn failure, missing scratch directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// A single git subcommand invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInvocation {
    pub args: Vec<String>,

    /// Working directory. `None` runs in the process's current directory.
    pub workdir: Option<PathBuf>,

    /// Extra environment, applied after the clean base environment.
    pub env: Vec<(String, String)>,
}

impl GitInvocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GitInvocation {
            args: args.into_iter().map(Into::into).collect(),
            workdir: None,
            env: Vec::new(),
        }
    }

    /// Runs in `dir`, which is also exported as the git directory.
    ///
    /// Repositories are bare, so the git directory doubles as the workdir.
    pub fn in_repo(mut self, dir: &Path) -> Self {
        self.workdir = Some(dir.to_path_buf());
        self.env("GIT_DIR", dir.display().to_string())
    }

    /// Points git at a disposable index instead of the repository's own.
    pub fn with_index(self, index: &Path) -> Self {
        self.env("GIT_INDEX_FILE", index.display().to_string())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The git subcommand, e.g. `apply` for `git apply --check`.
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// Human-readable form for logs and error messages.
    pub fn display(&self) -> String {
        format!("git {}", self.args.join(" "))
    }
}

/// Captured result of a finished git process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Converts a non-zero exit into [`GitError::CommandFailed`].
    pub fn into_checked(self, invocation: &GitInvocation) -> GitResult<GitOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(GitError::CommandFailed {
                command: invocation.display(),
                stderr: self.stderr,
            })
        }
    }
}

/// Capability to execute git subcommands.
///
/// Implementations return `Ok` for any process that ran to completion,
/// including non-zero exits; callers classify exit codes themselves. `Err`
/// is reserved for failures to run the command at all.
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, invocation: &GitInvocation) -> GitResult<GitOutput>;
}

/// Runs the real git binary.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    git_binary: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(git_binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        ProcessRunner {
            git_binary: git_binary.into(),
            timeout,
        }
    }

    /// Create a git Command with clean environment (no system/user config).
    ///
    /// This ensures consistent behavior across different machines by ignoring
    /// system and user git configuration (e.g., hooks, aliases, autocrlf).
    fn git_command(&self, invocation: &GitInvocation) -> Command {
        let mut cmd = Command::new(&self.git_binary);
        if let Some(dir) = &invocation.workdir {
            cmd.current_dir(dir);
        }

        cmd.env("GIT_CONFIG_NOSYSTEM", "1");
        cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        ProcessRunner::new("git", Duration::from_secs(360))
    }
}

#[async_trait]
impl GitRunner for ProcessRunner {
    async fn run(&self, invocation: &GitInvocation) -> GitResult<GitOutput> {
        trace!(command = %invocation.display(), "running git");

        let child = self.git_command(invocation).output();
        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result?,
            // Dropping the future kills the child.
            Err(_) => {
                return Err(GitError::Timeout {
                    command: invocation.display(),
                    after: self.timeout,
                });
            }
        };

        Ok(GitOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run an invocation and fail on a non-zero exit.
pub async fn run_checked(
    runner: &dyn GitRunner,
    invocation: GitInvocation,
) -> GitResult<GitOutput> {
    runner.run(&invocation).await?.into_checked(&invocation)
}

/// Run an invocation and return its trimmed stdout.
pub async fn run_stdout(runner: &dyn GitRunner, invocation: GitInvocation) -> GitResult<String> {
    let output = run_checked(runner, invocation).await?;
    Ok(output.stdout_trimmed().to_string())
}

/// Check if one revision is an ancestor of another.
pub async fn is_ancestor(
    runner: &dyn GitRunner,
    git_dir: &Path,
    index: Option<&Path>,
    potential_ancestor: &str,
    descendant: &str,
) -> GitResult<bool> {
    let mut invocation = GitInvocation::new([
        "merge-base",
        "--is-ancestor",
        potential_ancestor,
        descendant,
    ])
    .in_repo(git_dir);
    if let Some(index) = index {
        invocation = invocation.with_index(index);
    }

    let output = runner.run(&invocation).await?;

    // Exit 0 = is ancestor, exit 1 = not ancestor, other = error
    match output.code {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(GitError::CommandFailed {
            command: invocation.display(),
            stderr: output.stderr,
        }),
    }
}

/// Resolve a revision to a full commit id.
pub async fn rev_parse(runner: &dyn GitRunner, git_dir: &Path, rev: &str) -> GitResult<Sha> {
    let invocation = GitInvocation::new(["rev-parse", "--verify", rev]).in_repo(git_dir);
    let sha_str = run_stdout(runner, invocation).await?;
    Sha::parse(&sha_str).map_err(|_| GitError::InvalidSha(sha_str))
}
