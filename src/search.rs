//! The width × depth repair search for one bug.
//!
//! Each bug gets up to `width_try` independent attempts. A width attempt
//! opens from the original buggy code; if the opening round compiles but
//! still fails tests, up to `deep_try - 1` refinement rounds follow, each
//! prompted from the latest adopted candidates plus the accumulated attempt
//! history. Candidates are always applied against the original method
//! bodies on a freshly restored tree; the adopted candidates only steer the
//! prompts.
//!
//! Every round's candidates and verdict are persisted before the state
//! machine advances, so a crash mid-search loses at most the in-flight
//! round.

use tracing::{info, warn};

use crate::candidates::{extract_fixed_methods, MATCH_FAILED};
use crate::config::RunConfig;
use crate::dataset::{exception_for, BugId, ExceptionNote, MethodSample};
use crate::llm::ChatModel;
use crate::outcome::AttemptOutcome;
use crate::prompts;
use crate::results::{EvalRow, ResultRow, RunLog};
use crate::traces;
use crate::validate::{FileReplacements, Validation};

/// Where the search stands when a round's verdict comes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// First round of a width attempt, prompted from the original code.
    Opening,
    /// A later round, prompted from the latest adopted candidates.
    Refining,
}

/// What the search does after a classified round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Repair succeeded; stop the bug.
    Stop,
    /// Continue refining within the current width attempt.
    NextDepth,
    /// Abandon the current width attempt.
    NextWidth,
    /// Fatal outcome; abandon the bug entirely.
    AbortBug,
}

/// How one bug's search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchVerdict {
    Succeeded,
    Exhausted,
    Aborted,
}

/// The transition function of the search state machine.
///
/// An opening success stops the bug regardless of the early-stop setting;
/// a refining success without early-stop keeps searching, and the verdict
/// stays with the logged reward rows. Timeout is fatal for the whole bug
/// in either phase.
pub fn next_step(phase: RoundPhase, outcome: &AttemptOutcome, early_stop: bool) -> NextStep {
    match phase {
        RoundPhase::Opening => match outcome {
            AttemptOutcome::Success => NextStep::Stop,
            AttemptOutcome::Timeout => NextStep::AbortBug,
            AttemptOutcome::TestFailed(_) => NextStep::NextDepth,
            AttemptOutcome::CompileFailed
            | AttemptOutcome::LocateFailed { .. }
            | AttemptOutcome::InternalError(_) => NextStep::NextWidth,
        },
        RoundPhase::Refining => match outcome {
            AttemptOutcome::CompileFailed | AttemptOutcome::LocateFailed { .. } => {
                NextStep::NextWidth
            }
            AttemptOutcome::Timeout => NextStep::AbortBug,
            AttemptOutcome::Success if early_stop => NextStep::Stop,
            _ => NextStep::NextDepth,
        },
    }
}

/// Run the full search for one bug. `samples` must already be deduplicated.
#[allow(clippy::too_many_arguments)]
pub async fn run_bug<M: ChatModel, V: Validation>(
    config: &RunConfig,
    model: &M,
    validator: &V,
    log: &RunLog,
    attempt_id: u64,
    bug: &BugId,
    samples: &[MethodSample],
    exceptions: &[ExceptionNote],
) -> anyhow::Result<SearchVerdict> {
    let slug = bug.slug();
    let search = BugSearch {
        config,
        model,
        validator,
        log,
        attempt_id,
        bug,
        exception_info: exception_for(exceptions, &slug),
        slug,
        samples,
    };
    search.run().await
}

struct Round {
    outcome: AttemptOutcome,
    candidates: Vec<String>,
    response: String,
}

struct BugSearch<'a, M, V> {
    config: &'a RunConfig,
    model: &'a M,
    validator: &'a V,
    log: &'a RunLog,
    attempt_id: u64,
    bug: &'a BugId,
    slug: String,
    samples: &'a [MethodSample],
    exception_info: String,
}

impl<M: ChatModel, V: Validation> BugSearch<'_, M, V> {
    async fn run(&self) -> anyhow::Result<SearchVerdict> {
        let mut width_history: Vec<String> = Vec::new();

        for width in 0..self.config.width_try {
            info!(slug = %self.slug, width, "starting width attempt");

            let mut depth_history: Vec<String> = Vec::new();
            let mut current: Vec<MethodSample> = self.samples.to_vec();
            let mut iteration = 0u32;

            let attempt_end = loop {
                let phase = if iteration == 0 {
                    RoundPhase::Opening
                } else {
                    RoundPhase::Refining
                };

                let round = self
                    .round(width, iteration, &current, &width_history, &depth_history)
                    .await?;
                let label = round.outcome.label();
                info!(slug = %self.slug, width, iteration, result = %label, "round classified");

                self.persist_round(&round, &current, width, iteration)?;

                depth_history.push(prompts::depth_history_entry(
                    iteration,
                    &round.response,
                    &label,
                ));
                if iteration == 0 {
                    width_history.push(prompts::width_history_entry(
                        width,
                        &round.response,
                        &label,
                    ));
                }

                self.adopt_candidates(phase, &round, &mut current);

                match next_step(phase, &round.outcome, self.config.early_stop) {
                    NextStep::NextDepth => {
                        iteration += 1;
                        if iteration >= self.config.deep_try {
                            break NextStep::NextWidth;
                        }
                    }
                    step => break step,
                }
            };

            if !self.validator.restore(&self.slug) {
                warn!(slug = %self.slug, width, "work tree restore failed after width attempt");
            }

            match attempt_end {
                NextStep::Stop => {
                    info!(slug = %self.slug, width, "repair succeeded");
                    return Ok(SearchVerdict::Succeeded);
                }
                NextStep::AbortBug => {
                    warn!(slug = %self.slug, width, "fatal outcome, abandoning bug");
                    return Ok(SearchVerdict::Aborted);
                }
                _ => {}
            }
        }

        info!(slug = %self.slug, "attempt budget exhausted");
        Ok(SearchVerdict::Exhausted)
    }

    async fn round(
        &self,
        width: u32,
        iteration: u32,
        current: &[MethodSample],
        width_history: &[String],
        depth_history: &[String],
    ) -> anyhow::Result<Round> {
        let traces = traces::trace_files(
            &self.config.debug_info_dir,
            &self.config.method_calls_dir,
            &self.config.dynamic_dir,
            self.bug,
            width,
            iteration,
        );

        let mut messages =
            prompts::build_messages(self.config.mode, current, &self.exception_info, &traces);
        if iteration == 0 {
            prompts::apply_width_guidance(&mut messages, width_history);
        } else {
            prompts::apply_depth_guidance(&mut messages, depth_history);
        }

        let Some(reply) = self.model.chat(&messages, self.config.temperature).await else {
            return Ok(Round {
                outcome: AttemptOutcome::InternalError("LLM request failed".to_string()),
                candidates: vec![MATCH_FAILED.to_string(); self.samples.len()],
                response: String::new(),
            });
        };

        self.log
            .record_round(self.bug, width, iteration, &messages, &reply.content)?;
        self.log
            .append_usage(&self.slug, self.attempt_id, &reply.usage)?;

        let candidates = extract_fixed_methods(&reply.content, self.samples.len());
        let replacements = self.replacements_for(&candidates);
        let outcome = self.validator.validate(&self.slug, &replacements);

        Ok(Round {
            outcome,
            candidates,
            response: reply.content,
        })
    }

    /// Candidates always pair with the original buggy bodies; the restored
    /// tree contains those, not the previous round's patch.
    fn replacements_for(&self, candidates: &[String]) -> FileReplacements {
        let mut replacements: FileReplacements = Vec::new();
        for (sample, fixed) in self.samples.iter().zip(candidates) {
            let pair = (sample.buggy_code.trim().to_string(), fixed.clone());
            if let Some((_, pairs)) = replacements
                .iter_mut()
                .find(|(path, _)| path == &sample.class_path)
            {
                pairs.push(pair);
            } else {
                replacements.push((sample.class_path.clone(), vec![pair]));
            }
        }
        replacements
    }

    /// Update the prompt baseline for the next round. The opening round
    /// adopts wholesale on a test failure; refinement rounds adopt per
    /// sample on any compiling outcome, keeping the previous baseline where
    /// extraction produced a sentinel.
    fn adopt_candidates(&self, phase: RoundPhase, round: &Round, current: &mut [MethodSample]) {
        match phase {
            RoundPhase::Opening => {
                if matches!(round.outcome, AttemptOutcome::TestFailed(_)) {
                    for (sample, fixed) in current.iter_mut().zip(&round.candidates) {
                        sample.buggy_code = fixed.clone();
                    }
                }
            }
            RoundPhase::Refining => {
                if round.outcome != AttemptOutcome::CompileFailed {
                    for (sample, fixed) in current.iter_mut().zip(&round.candidates) {
                        if fixed != MATCH_FAILED {
                            sample.buggy_code = fixed.clone();
                        }
                    }
                }
            }
        }
    }

    /// Rows record the prompt baseline of the round that produced them.
    fn persist_round(
        &self,
        round: &Round,
        current: &[MethodSample],
        width: u32,
        iteration: u32,
    ) -> anyhow::Result<()> {
        for (sample, fixed) in current.iter().zip(&round.candidates) {
            self.log.append_result(&ResultRow {
                attempt_id: self.attempt_id,
                bug_id: sample.slug.clone(),
                buggy_code: sample.buggy_code.clone(),
                fixed_code: fixed.clone(),
                width_attempt: width,
                depth_iteration: iteration,
            })?;
        }
        self.log.append_eval(&EvalRow {
            attempt_id: self.attempt_id,
            bug_id: self.slug.clone(),
            reward: round.outcome.reward(),
            classification: round.outcome.label(),
            width_attempt: width,
            depth_iteration: iteration,
        })
    }
}
