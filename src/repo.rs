//! Working-tree restore and checkout management for Defects4J bugs.
//!
//! Every validation round starts from a pristine tree: `git reset --hard`
//! followed by `git clean -fd`, both run as external commands in the bug's
//! checkout. Restore reports success as a bool and never panics; a failed
//! restore leaves the tree in an unknown state, which callers must surface
//! loudly before trusting any further test results.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::dataset::BugId;

/// Path of the bug's checkout: `<base_dir>/<slug>_buggy`.
pub fn work_tree(base_dir: &Path, slug: &str) -> PathBuf {
    base_dir.join(format!("{slug}_buggy"))
}

/// Force the working tree back to its last committed state and remove all
/// untracked files and directories. Both steps must exit zero.
pub fn restore_work_tree(base_dir: &Path, slug: &str) -> bool {
    let dir = work_tree(base_dir, slug);
    if !dir.is_dir() {
        warn!(slug, dir = %dir.display(), "restore skipped, working tree missing");
        return false;
    }
    run_git(&dir, &["reset", "--hard"]) && run_git(&dir, &["clean", "-fd"])
}

fn run_git(dir: &Path, args: &[&str]) -> bool {
    match Command::new("git").args(args).current_dir(dir).output() {
        Ok(out) if out.status.success() => true,
        Ok(out) => {
            warn!(
                dir = %dir.display(),
                ?args,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "git command failed"
            );
            false
        }
        Err(err) => {
            warn!(dir = %dir.display(), ?args, error = %err, "failed to run git");
            false
        }
    }
}

/// Check that the bug's working tree exists and is a usable git repository
/// before any search round runs against it.
pub fn verify_work_tree(base_dir: &Path, slug: &str) -> Result<PathBuf> {
    let dir = work_tree(base_dir, slug);
    if !dir.is_dir() {
        bail!("working tree not found: {}", dir.display());
    }
    git2::Repository::open(&dir)
        .with_context(|| format!("not a git repository: {}", dir.display()))?;
    debug!(slug, dir = %dir.display(), "working tree verified");
    Ok(dir)
}

/// Prepare one bug's checkout with `<runner> checkout -p <project> -v <id>b`.
/// Trees that already verify are left alone.
pub fn checkout_bug(runner: &str, base_dir: &Path, bug: &BugId) -> Result<()> {
    let slug = bug.slug();
    let dir = work_tree(base_dir, &slug);
    if verify_work_tree(base_dir, &slug).is_ok() {
        info!(slug, "checkout already present");
        return Ok(());
    }

    info!(slug, dir = %dir.display(), "checking out buggy revision");
    let status = Command::new(runner)
        .args(["checkout", "-p", &bug.project, "-v", &format!("{}b", bug.number)])
        .arg("-w")
        .arg(&dir)
        .status()
        .with_context(|| format!("failed to run `{runner} checkout` for {slug}"))?;

    if !status.success() {
        bail!("`{runner} checkout` failed for {slug} ({status})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git(dir: &Path, args: &[&str]) {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    fn init_bug_tree(base: &Path, slug: &str) -> PathBuf {
        let dir = work_tree(base, slug);
        fs::create_dir_all(&dir).expect("create tree");
        git(&dir, &["init"]);
        git(&dir, &["config", "user.email", "test@example.com"]);
        git(&dir, &["config", "user.name", "test"]);
        fs::write(dir.join("Main.java"), "class Main {}\n").expect("seed file");
        git(&dir, &["add", "."]);
        git(&dir, &["commit", "-m", "baseline"]);
        dir
    }

    #[test]
    fn restore_discards_edits_and_untracked_files() {
        let base = tempfile::tempdir().expect("tempdir");
        let dir = init_bug_tree(base.path(), "Lang_1");

        fs::write(dir.join("Main.java"), "class Main { int broken; }\n").expect("edit");
        fs::write(dir.join("scratch.txt"), "leftover\n").expect("untracked");

        assert!(restore_work_tree(base.path(), "Lang_1"));

        let restored = fs::read_to_string(dir.join("Main.java")).expect("read back");
        assert_eq!(restored, "class Main {}\n");
        assert!(!dir.join("scratch.txt").exists());
    }

    #[test]
    fn restore_twice_on_clean_tree_succeeds_both_times() {
        let base = tempfile::tempdir().expect("tempdir");
        let dir = init_bug_tree(base.path(), "Math_2");
        let before = fs::read_to_string(dir.join("Main.java")).expect("read");

        assert!(restore_work_tree(base.path(), "Math_2"));
        assert!(restore_work_tree(base.path(), "Math_2"));

        let after = fs::read_to_string(dir.join("Main.java")).expect("read");
        assert_eq!(before, after);
    }

    #[test]
    fn restore_reports_failure_for_missing_tree() {
        let base = tempfile::tempdir().expect("tempdir");
        assert!(!restore_work_tree(base.path(), "Gone_9"));
    }

    #[test]
    fn restore_reports_failure_for_non_git_dir() {
        let base = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(work_tree(base.path(), "Plain_3")).expect("mkdir");
        assert!(!restore_work_tree(base.path(), "Plain_3"));
    }

    #[test]
    fn verify_accepts_git_trees_and_rejects_others() {
        let base = tempfile::tempdir().expect("tempdir");
        init_bug_tree(base.path(), "Chart_4");

        assert!(verify_work_tree(base.path(), "Chart_4").is_ok());
        assert!(verify_work_tree(base.path(), "Chart_5").is_err());

        fs::create_dir_all(work_tree(base.path(), "Chart_6")).expect("mkdir");
        assert!(verify_work_tree(base.path(), "Chart_6").is_err());
    }
}
