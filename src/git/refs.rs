//! Hidden pull refs and patch generation.
//!
//! Each pull request's head is mirrored into the base repository at
//! `refs/pull/<index>/head` so merge detection can run against the base
//! repository alone. Both operations here talk to the other repository
//! through a temporary remote that is removed whether or not the operation
//! succeeds.

use std::path::Path;

use tracing::{debug, error};

use crate::types::{PullId, Sha};

use super::{GitError, GitInvocation, GitResult, GitRunner, run_checked, run_stdout};

/// The hidden ref under which a pull request's head is mirrored.
pub fn hidden_ref(index: i64) -> String {
    format!("refs/pull/{}/head", index)
}

/// Fresh merge-base and patch text for a pull request's head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRefresh {
    pub merge_base: Sha,
    pub patch: String,
}

/// Add a temporary remote, run `body`, then remove the remote.
///
/// Removal failures are logged; the body's result is returned either way.
async fn with_temp_remote<T, F, Fut>(
    runner: &dyn GitRunner,
    repo: &Path,
    name: &str,
    url: &Path,
    fetch: bool,
    body: F,
) -> GitResult<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = GitResult<T>>,
{
    let url = url.display().to_string();
    let mut add = vec!["remote", "add"];
    if fetch {
        add.push("-f");
    }
    add.extend([name, url.as_str()]);
    run_checked(runner, GitInvocation::new(add).in_repo(repo)).await?;

    let result = body().await;

    let remove = GitInvocation::new(["remote", "remove", name]).in_repo(repo);
    if let Err(e) = run_checked(runner, remove).await {
        error!(remote = name, repo = %repo.display(), error = %e, "failed to remove temporary remote");
    }

    result
}

/// Force-push the head branch to the base repository's hidden pull ref.
pub async fn push_to_base_repo(
    runner: &dyn GitRunner,
    pull: PullId,
    index: i64,
    head_repo: &Path,
    head_branch: &str,
    base_repo: &Path,
) -> GitResult<()> {
    let remote = format!("tmp-pull-{}", pull);
    let target = hidden_ref(index);
    debug!(pull = %pull, target = %target, "pushing head to base repository");

    with_temp_remote(runner, head_repo, &remote, base_repo, false, || async {
        // A stale loose ref would make the forced update conflict.
        match tokio::fs::remove_file(base_repo.join(&target)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GitError::Io(e)),
        }

        let refspec = format!("{}:{}", head_branch, target);
        run_checked(
            runner,
            GitInvocation::new(["push", "-f", remote.as_str(), refspec.as_str()]).in_repo(head_repo),
        )
        .await?;
        Ok(())
    })
    .await
}

/// Compute the merge-base against the base branch and the binary patch from it
/// to the head branch.
///
/// Runs in the head repository, which fetches the base repository through a
/// temporary remote named `remote`.
pub async fn generate_patch(
    runner: &dyn GitRunner,
    remote: &str,
    head_repo: &Path,
    head_branch: &str,
    base_repo: &Path,
    base_branch: &str,
) -> GitResult<PatchRefresh> {
    with_temp_remote(runner, head_repo, remote, base_repo, true, || async {
        let remote_base = format!("{}/{}", remote, base_branch);
        let merge_base_str = run_stdout(
            runner,
            GitInvocation::new(["merge-base", "--", remote_base.as_str(), head_branch])
                .in_repo(head_repo),
        )
        .await?;
        let merge_base =
            Sha::parse(&merge_base_str).map_err(|_| GitError::InvalidSha(merge_base_str))?;

        let output = run_checked(
            runner,
            GitInvocation::new(["diff", "-p", "--binary", merge_base.as_str(), head_branch])
                .in_repo(head_repo),
        )
        .await?;

        Ok(PatchRefresh {
            merge_base,
            patch: output.stdout,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeGit, sha};
    use std::path::PathBuf;

    #[test]
    fn hidden_ref_layout() {
        assert_eq!(hidden_ref(1), "refs/pull/1/head");
        assert_eq!(hidden_ref(1234), "refs/pull/1234/head");
    }

    #[tokio::test]
    async fn push_removes_remote_even_on_failure() {
        let git = FakeGit::new();
        git.fail("push", 1, "error: failed to push some refs");

        let base = tempfile::tempdir().unwrap();
        let err = push_to_base_repo(
            &git,
            PullId(3),
            7,
            &PathBuf::from("/repos/alice/fork.git"),
            "feature",
            base.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));

        let calls = git.calls();
        let base_url = base.path().display().to_string();
        assert_eq!(calls[0].args, ["remote", "add", "tmp-pull-3", base_url.as_str()]);
        assert_eq!(calls[1].args, ["push", "-f", "tmp-pull-3", "feature:refs/pull/7/head"]);
        assert_eq!(calls[2].args, ["remote", "remove", "tmp-pull-3"]);
    }

    #[tokio::test]
    async fn push_deletes_stale_loose_ref() {
        let git = FakeGit::new();
        let base = tempfile::tempdir().unwrap();
        let stale = base.path().join("refs/pull/7/head");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "0000000000000000000000000000000000000000\n").unwrap();

        push_to_base_repo(
            &git,
            PullId(3),
            7,
            &PathBuf::from("/repos/alice/fork.git"),
            "feature",
            base.path(),
        )
        .await
        .unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn generate_patch_uses_merge_base() {
        let git = FakeGit::new();
        git.respond("merge-base", &format!("{}\n", sha('a')));
        git.respond("diff", "diff --git a/x.txt b/x.txt\n");

        let refresh = generate_patch(
            &git,
            "tmp-patch-1",
            &PathBuf::from("/repos/alice/fork.git"),
            "feature",
            &PathBuf::from("/repos/bob/repo.git"),
            "main",
        )
        .await
        .unwrap();

        assert_eq!(refresh.merge_base, Sha::parse(sha('a')).unwrap());
        assert!(refresh.patch.starts_with("diff --git"));

        let calls = git.calls();
        assert_eq!(calls[0].args, ["remote", "add", "-f", "tmp-patch-1", "/repos/bob/repo.git"]);
        assert_eq!(calls[1].args, ["merge-base", "--", "tmp-patch-1/main", "feature"]);
        assert_eq!(calls[2].args[..3], ["diff", "-p", "--binary"]);
        assert_eq!(calls[3].args, ["remote", "remove", "tmp-patch-1"]);
    }

    #[tokio::test]
    async fn generate_patch_rejects_garbage_merge_base() {
        let git = FakeGit::new();
        git.respond("merge-base", "not a sha\n");

        let err = generate_patch(
            &git,
            "tmp-patch-1",
            &PathBuf::from("/h.git"),
            "feature",
            &PathBuf::from("/b.git"),
            "main",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GitError::InvalidSha(_)));
        assert_eq!(git.calls().last().unwrap().subcommand(), "remote");
    }
}
