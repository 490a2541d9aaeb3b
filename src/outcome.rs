//! The fixed outcome taxonomy for one validation round, and the mapping
//! from captured test output into it.

use regex::Regex;

use crate::runner::TestRun;

/// Literal marker Defects4J prints when the test-compilation phase fails.
/// Its presence overrides any failing-test text also present in the output.
pub const COMPILE_FAIL_MARKER: &str =
    "Running ant (compile.tests)................................................ FAIL";

const FAILING_TESTS_PATTERN: &str = r"Failing tests:\s*(\d+)";

/// Classification of one reset → apply → test round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Candidate did not compile; abandon the current width/depth branch.
    CompileFailed,
    /// Test run exceeded its wall-clock budget; fatal for the whole bug.
    Timeout,
    /// A recorded method body was not found in the current source.
    LocateFailed { path: String },
    /// Compiles, but `n` tests still fail; drives continued search.
    TestFailed(u32),
    /// Zero failing tests.
    Success,
    /// Unexpected failure in I/O, spawning, or classification.
    InternalError(String),
}

impl AttemptOutcome {
    /// True only for `Success`.
    pub fn reward(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    /// Classification string recorded in the evaluation log and fed back
    /// into refinement prompts.
    pub fn label(&self) -> String {
        match self {
            AttemptOutcome::CompileFailed => "Compile failed".to_string(),
            AttemptOutcome::Timeout => "Time out".to_string(),
            AttemptOutcome::LocateFailed { path } => {
                format!("Replace failed: Locate failed: Could not find method in {path}")
            }
            AttemptOutcome::TestFailed(n) => format!("Failing tests: {n}"),
            AttemptOutcome::Success => "Failing tests: 0".to_string(),
            AttemptOutcome::InternalError(msg) => msg.clone(),
        }
    }
}

/// Classify a finished test invocation.
pub fn classify_run(run: &TestRun) -> AttemptOutcome {
    if run.timed_out {
        return AttemptOutcome::Timeout;
    }
    if run.output.contains(COMPILE_FAIL_MARKER) {
        return AttemptOutcome::CompileFailed;
    }
    failing_tests_outcome(&run.output)
}

fn failing_tests_outcome(output: &str) -> AttemptOutcome {
    let captured = Regex::new(FAILING_TESTS_PATTERN)
        .ok()
        .and_then(|re| re.captures(output).map(|c| c[1].to_string()));

    let Some(count) = captured else {
        return AttemptOutcome::InternalError("Failing tests count not found".to_string());
    };

    match count.parse::<u32>() {
        Ok(0) => AttemptOutcome::Success,
        Ok(n) => AttemptOutcome::TestFailed(n),
        Err(_) => {
            AttemptOutcome::InternalError(format!("Failing tests count not parseable: {count}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn finished(output: &str) -> TestRun {
        TestRun {
            status: None,
            output: output.to_string(),
            timed_out: false,
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn compile_marker_beats_failing_tests_text() {
        let output = format!("{COMPILE_FAIL_MARKER}\nFailing tests: 3\n");
        assert_eq!(classify_run(&finished(&output)), AttemptOutcome::CompileFailed);
    }

    #[test]
    fn zero_failing_tests_is_success() {
        let run = finished("Running ant (compile.tests)... OK\nFailing tests: 0\n");
        let outcome = classify_run(&run);
        assert_eq!(outcome, AttemptOutcome::Success);
        assert!(outcome.reward());
        assert_eq!(outcome.label(), "Failing tests: 0");
    }

    #[test]
    fn nonzero_count_is_test_failed() {
        let outcome = classify_run(&finished("Failing tests: 3\n  - org.example.FooTest"));
        assert_eq!(outcome, AttemptOutcome::TestFailed(3));
        assert!(!outcome.reward());
        assert_eq!(outcome.label(), "Failing tests: 3");
    }

    #[test]
    fn whitespace_between_colon_and_count_is_accepted() {
        let outcome = classify_run(&finished("Failing tests:   12\n"));
        assert_eq!(outcome, AttemptOutcome::TestFailed(12));
    }

    #[test]
    fn first_count_wins_when_repeated() {
        let outcome = classify_run(&finished("Failing tests: 2\nFailing tests: 9\n"));
        assert_eq!(outcome, AttemptOutcome::TestFailed(2));
    }

    #[test]
    fn missing_count_is_an_internal_error() {
        let outcome = classify_run(&finished("BUILD FAILED for unrelated reasons\n"));
        assert_eq!(
            outcome,
            AttemptOutcome::InternalError("Failing tests count not found".to_string())
        );
        assert_eq!(outcome.label(), "Failing tests count not found");
    }

    #[test]
    fn absurd_count_is_an_internal_error_not_a_panic() {
        let outcome = classify_run(&finished("Failing tests: 99999999999999999999\n"));
        assert!(matches!(outcome, AttemptOutcome::InternalError(_)));
    }

    #[test]
    fn timeout_always_classifies_as_timeout() {
        let run = TestRun {
            status: None,
            output: format!("{COMPILE_FAIL_MARKER}\n"),
            timed_out: true,
            elapsed: Duration::from_secs(1200),
        };
        let outcome = classify_run(&run);
        assert_eq!(outcome, AttemptOutcome::Timeout);
        assert_eq!(outcome.label(), "Time out");
    }

    #[test]
    fn locate_failure_label_names_the_file() {
        let outcome = AttemptOutcome::LocateFailed {
            path: "src/java/org/example/Lang.java".to_string(),
        };
        assert_eq!(
            outcome.label(),
            "Replace failed: Locate failed: Could not find method in src/java/org/example/Lang.java"
        );
    }
}
