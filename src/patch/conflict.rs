//! Classification of `git apply --check` results.
//!
//! Git reports patch conflicts only as free text on stderr. The markers below
//! are the phrases that identify a content conflict as opposed to an
//! infrastructure failure; everything else about a failed apply is fatal.

use crate::git::GitOutput;
use crate::types::ConflictedFiles;

/// Phrases in `git apply` stderr that indicate a content conflict.
pub const CONFLICT_MARKERS: &[&str] = &[
    "patch does not apply",
    "already exists in working directory",
    "unrecognized input",
    "error:",
];

/// Prefix of the stderr lines that name a conflicting path.
pub const PATCH_FAILED_PREFIX: &str = "error: patch failed:";

/// Outcome of a dry-run apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyVerdict {
    /// The patch applies cleanly.
    Clean,

    /// The patch conflicts with the base; the named files failed to apply.
    ///
    /// The file list may be empty when git reported a conflict without
    /// naming paths (e.g. a new file that already exists).
    Conflict(ConflictedFiles),

    /// The apply failed for a reason that is not a content conflict.
    Fatal { stderr: String },
}

/// Returns the first conflict marker contained in `stderr`, if any.
pub fn matching_marker(stderr: &str) -> Option<&'static str> {
    CONFLICT_MARKERS
        .iter()
        .copied()
        .find(|marker| stderr.contains(marker))
}

pub fn is_conflict(stderr: &str) -> bool {
    matching_marker(stderr).is_some()
}

/// Extracts conflicting paths from `error: patch failed: <path>:<line>` lines.
///
/// Paths are trimmed, de-duplicated in order of first appearance, and capped at
/// [`crate::types::MAX_CONFLICTED_FILES`].
pub fn parse_conflicted_files(stderr: &str) -> ConflictedFiles {
    let mut files = ConflictedFiles::new();
    for line in stderr.lines() {
        if files.is_full() {
            break;
        }
        let Some(rest) = line.strip_prefix(PATCH_FAILED_PREFIX) else {
            continue;
        };
        let path = rest.split(':').next().unwrap_or("").trim();
        files.push(path);
    }
    files
}

/// Classify the output of `git apply --check --cached`.
pub fn classify_apply(output: &GitOutput) -> ApplyVerdict {
    if output.success() {
        return ApplyVerdict::Clean;
    }
    if is_conflict(&output.stderr) {
        return ApplyVerdict::Conflict(parse_conflicted_files(&output.stderr));
    }
    ApplyVerdict::Fatal {
        stderr: output.stderr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_CONFLICTED_FILES;
    use proptest::prelude::*;

    fn failed(stderr: &str) -> GitOutput {
        GitOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    // ─── Marker table ───

    #[test]
    fn each_marker_is_a_conflict() {
        for marker in CONFLICT_MARKERS {
            let stderr = format!("something {} something", marker);
            assert!(is_conflict(&stderr), "{} should match", marker);
        }
    }

    #[test]
    fn unrelated_failures_are_not_conflicts() {
        assert!(!is_conflict("fatal: unable to read index file"));
        assert!(!is_conflict("fatal: not a git repository"));
        assert!(!is_conflict(""));
    }

    #[test]
    fn first_marker_wins() {
        assert_eq!(
            matching_marker("error: patch failed: a.txt:1\nerror: a.txt: patch does not apply"),
            Some("patch does not apply")
        );
    }

    // ─── Path extraction ───

    #[test]
    fn extracts_path_before_line_number() {
        let stderr = "error: patch failed: x.txt:1\nerror: x.txt: patch does not apply\n";
        let files = parse_conflicted_files(stderr);
        assert_eq!(files.as_slice(), ["x.txt"]);
    }

    #[test]
    fn deduplicates_in_first_seen_order() {
        let stderr = "\
error: patch failed: src/b.rs:10
error: src/b.rs: patch does not apply
error: patch failed: src/a.rs:3
error: patch failed: src/b.rs:42
";
        let files = parse_conflicted_files(stderr);
        assert_eq!(files.as_slice(), ["src/b.rs", "src/a.rs"]);
    }

    #[test]
    fn ignores_lines_without_exact_prefix() {
        let stderr = "  error: patch failed: indented.txt:1\nwarning: patch failed: w.txt:1\n";
        assert!(parse_conflicted_files(stderr).is_empty());
    }

    #[test]
    fn stops_after_ten_distinct_paths() {
        let stderr: String = (0..30)
            .map(|i| format!("error: patch failed: f{}.txt:{}\n", i, i))
            .collect();
        let files = parse_conflicted_files(&stderr);
        assert_eq!(files.len(), MAX_CONFLICTED_FILES);
        assert_eq!(files.as_slice()[0], "f0.txt");
        assert_eq!(files.as_slice()[9], "f9.txt");
    }

    // ─── Verdicts ───

    #[test]
    fn success_is_clean_even_with_stderr_noise() {
        let out = GitOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: "warning: 1 line adds whitespace errors.".to_string(),
        };
        assert_eq!(classify_apply(&out), ApplyVerdict::Clean);
    }

    #[test]
    fn conflict_without_paths() {
        let verdict = classify_apply(&failed("error: new.txt: already exists in working directory"));
        assert_eq!(verdict, ApplyVerdict::Conflict(ConflictedFiles::new()));
    }

    #[test]
    fn unknown_failure_is_fatal() {
        let verdict = classify_apply(&failed("fatal: unable to create '/tmp/x/index.lock'"));
        assert!(matches!(verdict, ApplyVerdict::Fatal { .. }));
    }

    #[test]
    fn killed_process_without_marker_is_fatal() {
        let out = GitOutput {
            code: None,
            ..Default::default()
        };
        assert!(matches!(classify_apply(&out), ApplyVerdict::Fatal { .. }));
    }

    proptest! {
        #[test]
        fn parsed_files_bounded_and_unique(
            paths in prop::collection::vec("[a-f]{1,3}/[a-z]{1,4}\\.rs", 0..40)
        ) {
            let stderr: String = paths
                .iter()
                .map(|p| format!("error: patch failed: {}:7\n", p))
                .collect();
            let files = parse_conflicted_files(&stderr);
            prop_assert!(files.len() <= MAX_CONFLICTED_FILES);

            let mut seen = std::collections::HashSet::new();
            for f in files.iter() {
                prop_assert!(paths.iter().any(|p| p == f));
                prop_assert!(seen.insert(f));
            }
        }
    }
}
