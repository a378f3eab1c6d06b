use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::git::{GitInvocation, GitRunner, RepoWorkingPool, ScratchIndex, run_checked};
use crate::types::{ConflictedFiles, PullContext, PullStatus};

use super::conflict::{ApplyVerdict, classify_apply};
use super::store::PatchStore;
use super::{PatchError, PatchResult};

/// Verdict of one patch test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// No stored patch; nothing was tested.
    Skipped,

    Mergeable,

    Conflict(ConflictedFiles),
}

impl PatchOutcome {
    /// Status and conflict list to record for this outcome.
    ///
    /// A skipped test leaves nothing pending, so it resolves like a clean one.
    pub fn resolution(self) -> (PullStatus, ConflictedFiles) {
        match self {
            PatchOutcome::Skipped | PatchOutcome::Mergeable => {
                (PullStatus::Mergeable, ConflictedFiles::new())
            }
            PatchOutcome::Conflict(files) => (PullStatus::Conflict, files),
        }
    }
}

/// Runs patch tests. Cheap to share behind an `Arc`.
pub struct PatchTester {
    runner: Arc<dyn GitRunner>,
    patches: PatchStore,
    pool: RepoWorkingPool,
    scratch_root: PathBuf,
}

impl PatchTester {
    pub fn new(
        runner: Arc<dyn GitRunner>,
        patches: PatchStore,
        pool: RepoWorkingPool,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        PatchTester {
            runner,
            patches,
            pool,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn patches(&self) -> &PatchStore {
        &self.patches
    }

    /// Dry-apply the pull request's stored patch onto its base branch.
    ///
    /// Holds the base repository's exclusive slot for the whole attempt. A
    /// missing patch is not an error; retrying without a new patch could not
    /// produce a different answer.
    #[instrument(skip_all, fields(pull = %ctx.pull.id, repo = %ctx.base_repo.id))]
    pub async fn test(&self, ctx: &PullContext) -> PatchResult<PatchOutcome> {
        let pull = &ctx.pull;
        let base = &ctx.base_repo;

        let Some(patch_path) = self.patches.locate(base.id, pull.index) else {
            debug!("no stored patch, ignoring corrupted data");
            return Ok(PatchOutcome::Skipped);
        };

        let _slot = self.pool.acquire(base.id).await;
        trace!(patch = %patch_path.display(), "testing patch");

        let scratch = ScratchIndex::create(&self.scratch_root, "patch-test")?;

        run_checked(
            self.runner.as_ref(),
            GitInvocation::new(["read-tree", pull.base_branch.as_str()])
                .in_repo(&base.path)
                .with_index(scratch.index_path()),
        )
        .await?;

        let mut args = vec![
            "apply".to_string(),
            "--check".to_string(),
            "--cached".to_string(),
        ];
        if base.pull_config.ignore_whitespace_conflicts {
            args.push("--ignore-whitespace".to_string());
        }
        args.push(patch_path.display().to_string());

        let apply = GitInvocation::new(args)
            .in_repo(&base.path)
            .with_index(scratch.index_path());
        let output = self.runner.run(&apply).await?;

        match classify_apply(&output) {
            ApplyVerdict::Clean => {
                debug!("patch applies cleanly");
                Ok(PatchOutcome::Mergeable)
            }
            ApplyVerdict::Conflict(files) => {
                debug!(files = ?files.as_slice(), "patch conflicts");
                Ok(PatchOutcome::Conflict(files))
            }
            ApplyVerdict::Fatal { stderr } => Err(PatchError::Apply {
                pull: pull.id,
                stderr,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitError;
    use crate::test_utils::{FakeGit, context_fixture};
    use crate::types::{PullId, RepoId};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        git: Arc<FakeGit>,
        tester: PatchTester,
        data: TempDir,
        scratch: TempDir,
    }

    fn harness() -> Harness {
        let git = Arc::new(FakeGit::new());
        let data = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let tester = PatchTester::new(
            git.clone(),
            PatchStore::new(data.path()),
            RepoWorkingPool::new(),
            scratch.path(),
        );
        Harness {
            git,
            tester,
            data,
            scratch,
        }
    }

    fn store_patch(h: &Harness, repo: RepoId, index: i64) -> PathBuf {
        h.tester.patches().save(repo, index, b"diff --git a/x.txt b/x.txt\n").unwrap()
    }

    #[tokio::test]
    async fn missing_patch_is_skipped_without_running_git() {
        let h = harness();
        let ctx = context_fixture(PullId(1), 1);

        let outcome = h.tester.test(&ctx).await.unwrap();
        assert_eq!(outcome, PatchOutcome::Skipped);
        assert!(h.git.calls().is_empty());
        assert!(h.data.path().exists());
    }

    #[tokio::test]
    async fn clean_apply_is_mergeable() {
        let h = harness();
        let ctx = context_fixture(PullId(1), 5);
        let patch_path = store_patch(&h, ctx.base_repo.id, 5);

        assert_eq!(h.tester.test(&ctx).await.unwrap(), PatchOutcome::Mergeable);

        let calls = h.git.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, ["read-tree", "main"]);
        let patch_arg = patch_path.display().to_string();
        assert_eq!(calls[1].args, ["apply", "--check", "--cached", patch_arg.as_str()]);

        // Both commands share one scratch index under the scratch root.
        let index_of = |inv: &GitInvocation| {
            inv.env
                .iter()
                .find(|(k, _)| k == "GIT_INDEX_FILE")
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(index_of(&calls[0]), index_of(&calls[1]));
        assert!(index_of(&calls[0]).starts_with(&h.scratch.path().display().to_string()));
    }

    #[tokio::test]
    async fn scratch_index_removed_after_attempt() {
        let h = harness();
        let ctx = context_fixture(PullId(1), 5);
        store_patch(&h, ctx.base_repo.id, 5);
        h.git.fail("apply", 1, "error: patch failed: x.txt:1\n");

        h.tester.test(&ctx).await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(h.scratch.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn ignore_whitespace_flag_is_passed() {
        let h = harness();
        let mut ctx = context_fixture(PullId(1), 2);
        ctx.base_repo.pull_config.ignore_whitespace_conflicts = true;
        store_patch(&h, ctx.base_repo.id, 2);

        h.tester.test(&ctx).await.unwrap();
        let apply = &h.git.calls_to("apply")[0];
        assert_eq!(apply.args[3], "--ignore-whitespace");
    }

    #[tokio::test]
    async fn conflict_records_files() {
        let h = harness();
        let ctx = context_fixture(PullId(1), 3);
        store_patch(&h, ctx.base_repo.id, 3);
        h.git.fail(
            "apply",
            1,
            "error: patch failed: x.txt:1\nerror: x.txt: patch does not apply\n",
        );

        let outcome = h.tester.test(&ctx).await.unwrap();
        let (status, files) = outcome.resolution();
        assert_eq!(status, PullStatus::Conflict);
        assert_eq!(files.as_slice(), ["x.txt"]);
    }

    #[tokio::test]
    async fn unknown_apply_failure_is_fatal() {
        let h = harness();
        let ctx = context_fixture(PullId(4), 3);
        store_patch(&h, ctx.base_repo.id, 3);
        h.git.fail("apply", 128, "fatal: unable to write new index file");

        match h.tester.test(&ctx).await {
            Err(PatchError::Apply { pull, stderr }) => {
                assert_eq!(pull, PullId(4));
                assert!(stderr.contains("unable to write"));
            }
            other => panic!("expected Apply error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn read_tree_failure_is_fatal() {
        let h = harness();
        let ctx = context_fixture(PullId(1), 3);
        store_patch(&h, ctx.base_repo.id, 3);
        h.git.fail("read-tree", 128, "fatal: Not a valid object name main");

        let err = h.tester.test(&ctx).await.unwrap_err();
        assert!(matches!(err, PatchError::Git(GitError::CommandFailed { .. })));
        assert!(h.git.calls_to("apply").is_empty());
    }

    #[tokio::test]
    async fn idempotent_on_unchanged_inputs() {
        let h = harness();
        let ctx = context_fixture(PullId(1), 3);
        store_patch(&h, ctx.base_repo.id, 3);
        h.git.fail("apply", 1, "error: patch failed: a.txt:2\n");

        let first = h.tester.test(&ctx).await.unwrap();
        let second = h.tester.test(&ctx).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn tests_against_one_repo_do_not_overlap() {
        let h = harness();
        h.git.set_delay(Duration::from_millis(10));
        let tester = Arc::new(h.tester);

        let mut handles = Vec::new();
        for i in 1..=4 {
            let ctx = context_fixture(PullId(i), i);
            tester.patches().save(ctx.base_repo.id, i, b"patch").unwrap();
            let tester = Arc::clone(&tester);
            handles.push(tokio::spawn(async move { tester.test(&ctx).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), PatchOutcome::Mergeable);
        }

        assert_eq!(h.git.max_concurrency(), 1);
    }
}
