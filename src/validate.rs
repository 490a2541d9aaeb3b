//! One validation round: clean tree, apply candidate fixes, run the suite,
//! classify.
//!
//! Every failure mode folds into [`AttemptOutcome`]; nothing here panics or
//! propagates, so one broken round can never take down a batch run.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};
use walkdir::WalkDir;

use crate::outcome::{classify_run, AttemptOutcome};
use crate::patch::{self, ApplyError, Replacement};
use crate::repo;
use crate::runner;

/// Ordered per-file replacement lists for one round, in sample order.
pub type FileReplacements = Vec<(String, Vec<Replacement>)>;

/// Seam between the orchestrator and the on-disk validation engine, so
/// search logic is testable with scripted outcomes.
pub trait Validation {
    /// Reset the bug's tree, apply all replacements, run the tests, and
    /// classify the result.
    fn validate(&self, slug: &str, replacements: &FileReplacements) -> AttemptOutcome;

    /// Restore the bug's tree to its pristine state, after a width attempt
    /// or before moving on. Returns false when the tree state is unknown.
    fn restore(&self, slug: &str) -> bool;
}

/// The real engine: operates on `<base_dir>/<slug>_buggy` checkouts.
pub struct WorkTreeValidator {
    base_dir: PathBuf,
    runner: String,
    test_timeout: Duration,
}

impl WorkTreeValidator {
    pub fn new(base_dir: PathBuf, runner: String, test_timeout: Duration) -> Self {
        Self {
            base_dir,
            runner,
            test_timeout,
        }
    }
}

impl Validation for WorkTreeValidator {
    fn validate(&self, slug: &str, replacements: &FileReplacements) -> AttemptOutcome {
        if replacements.is_empty() {
            return AttemptOutcome::InternalError("No file replacements provided".to_string());
        }

        if !repo::restore_work_tree(&self.base_dir, slug) {
            // Proceeding on an unreset tree is the historical behavior; the
            // loud log is what makes the suspect round auditable.
            error!(
                slug,
                "work tree restore FAILED; tree state unknown, this round's result is suspect"
            );
        }

        let work_dir = repo::work_tree(&self.base_dir, slug);
        for (class_path, file_replacements) in replacements {
            let Some(path) = resolve_source_path(&work_dir, class_path) else {
                return AttemptOutcome::InternalError(format!(
                    "Replace failed: File not found: {class_path}"
                ));
            };
            if let Err(err) = patch::apply_to_file(&path, file_replacements) {
                return match err {
                    ApplyError::LocateFailed { path } => AttemptOutcome::LocateFailed { path },
                    other => AttemptOutcome::InternalError(format!("Replace failed: {other}")),
                };
            }
        }

        info!(slug, files = replacements.len(), "patches applied, running tests");
        match runner::run_tests(&self.runner, &work_dir, self.test_timeout) {
            Ok(run) => classify_run(&run),
            Err(err) => AttemptOutcome::InternalError(format!("JUnit test failed: {err}")),
        }
    }

    fn restore(&self, slug: &str) -> bool {
        repo::restore_work_tree(&self.base_dir, slug)
    }
}

/// Resolve a sample's class path inside the working tree. Absolute paths
/// pass through; relative paths join the tree; when the joined path does
/// not exist (the recorded source root moved between dataset versions),
/// fall back to a unique package-suffix match over the tree.
pub fn resolve_source_path(work_dir: &Path, class_path: &str) -> Option<PathBuf> {
    let candidate = Path::new(class_path);
    if candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let joined = work_dir.join(candidate);
    if joined.is_file() {
        return Some(joined);
    }

    find_by_suffix(work_dir, candidate)
}

fn find_by_suffix(work_dir: &Path, class_path: &Path) -> Option<PathBuf> {
    let file_name = class_path.file_name()?;
    let components: Vec<Component<'_>> = class_path.components().collect();

    let candidates: Vec<PathBuf> = WalkDir::new(work_dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == file_name)
        .map(|e| e.into_path())
        .collect();

    // Longest suffix first: drop leading source-root components one at a
    // time and accept only an unambiguous hit.
    for skip in 1..components.len() {
        let suffix: PathBuf = components[skip..].iter().collect();
        let mut hits = candidates.iter().filter(|p| p.ends_with(&suffix));
        match (hits.next(), hits.next()) {
            (Some(hit), None) => return Some(hit.clone()),
            (Some(_), Some(_)) => return None,
            (None, _) => continue,
        }
    }

    None
}
