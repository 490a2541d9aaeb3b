//! Run bookkeeping: append-only result logs, per-round prompt/response
//! records, token usage, and the resume checkpoint.
//!
//! All appends go through a short-lived exclusive file lock so that a second
//! process pointed at the same output directory cannot interleave half rows.
//! Logs are JSONL; the checkpoint is a single JSON object rewritten in place
//! after each completed bug.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::BugId;
use crate::llm::{ChatMessage, TokenUsage};

const LOCK_TIMEOUT_SECS: u64 = 10;
const LOCK_RETRY_MS: u64 = 50;

const RESULTS_FILE: &str = "results.jsonl";
const EVAL_FILE: &str = "eval.jsonl";
const USAGE_FILE: &str = "token_usage.jsonl";
const RECORDS_DIR: &str = "records";

/// One candidate per sample per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub attempt_id: u64,
    pub bug_id: String,
    pub buggy_code: String,
    pub fixed_code: String,
    pub width_attempt: u32,
    pub depth_iteration: u32,
}

/// One verdict per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRow {
    pub attempt_id: u64,
    pub bug_id: String,
    pub reward: bool,
    pub classification: String,
    pub width_attempt: u32,
    pub depth_iteration: u32,
}

/// Token bill for one successful model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRow {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub bug_id: String,
    pub attempt_id: u64,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    #[serde(default)]
    last_id: u64,
}

struct LogLock {
    file: File,
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Sink for everything a run writes besides the work trees themselves.
pub struct RunLog {
    out_dir: PathBuf,
    mode: String,
    model: String,
    run_id: String,
}

impl RunLog {
    pub fn new(out_dir: &Path, mode: &str, model: &str) -> Self {
        RunLog {
            out_dir: out_dir.to_path_buf(),
            mode: mode.to_string(),
            model: model.to_string(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.out_dir.join(RESULTS_FILE)
    }

    pub fn eval_path(&self) -> PathBuf {
        self.out_dir.join(EVAL_FILE)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.out_dir.join(format!("checkpoint_{}.json", self.mode))
    }

    fn lock(&self) -> anyhow::Result<LogLock> {
        fs::create_dir_all(&self.out_dir)?;

        let lock_path = self.out_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // lock file content does not matter, just the lock
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for log lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(LogLock { file })
    }

    fn append_row<T: Serialize>(&self, file_name: &str, row: &T) -> anyhow::Result<()> {
        let _lock = self.lock()?;
        let path = self.out_dir.join(file_name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let row = serde_json::to_string(row)?;
        writeln!(file, "{}", row)?;
        Ok(())
    }

    pub fn append_result(&self, row: &ResultRow) -> anyhow::Result<()> {
        self.append_row(RESULTS_FILE, row)
    }

    pub fn append_eval(&self, row: &EvalRow) -> anyhow::Result<()> {
        self.append_row(EVAL_FILE, row)
    }

    pub fn append_usage(
        &self,
        bug_id: &str,
        attempt_id: u64,
        usage: &TokenUsage,
    ) -> anyhow::Result<()> {
        let row = UsageRow {
            run_id: self.run_id.clone(),
            recorded_at: Utc::now(),
            bug_id: bug_id.to_string(),
            attempt_id,
            model: self.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        };
        self.append_row(USAGE_FILE, &row)
    }

    /// Id of the first bug the resumed run should process. Zero when no
    /// checkpoint exists yet.
    pub fn load_checkpoint(&self) -> anyhow::Result<u64> {
        let path = self.checkpoint_path();
        match fs::read_to_string(&path) {
            Ok(content) => {
                let checkpoint: Checkpoint = serde_json::from_str(&content)?;
                Ok(checkpoint.last_id)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save_checkpoint(&self, last_id: u64) -> anyhow::Result<()> {
        let _lock = self.lock()?;
        let content = serde_json::to_string(&Checkpoint { last_id })?;
        write_atomic(&self.checkpoint_path(), &content)
    }

    /// Persist the full prompt and raw response of one round for audit.
    pub fn record_round(
        &self,
        bug: &BugId,
        width: u32,
        iteration: u32,
        messages: &[ChatMessage],
        response: &str,
    ) -> anyhow::Result<()> {
        let _lock = self.lock()?;
        let dir = self.out_dir.join(RECORDS_DIR);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!(
            "{}_{}_width{}_iter{}.txt",
            bug.project, bug.number, width, iteration
        ));
        let prompt = serde_json::to_string_pretty(messages)?;

        let mut file = File::create(&path)?;
        write!(
            file,
            "==== Prompt ====\n{}\n\n==== Response ====\n{}",
            prompt, response
        )?;
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &Path) -> RunLog {
        RunLog::new(dir, "pure", "gpt-4o")
    }

    #[test]
    fn result_rows_append_as_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = log_in(dir.path());

        for round in 0..2 {
            log.append_result(&ResultRow {
                attempt_id: 3,
                bug_id: "Lang_1".to_string(),
                buggy_code: "int f() {}".to_string(),
                fixed_code: "int f() { return 1; }".to_string(),
                width_attempt: 0,
                depth_iteration: round,
            })
            .expect("append");
        }

        let content = fs::read_to_string(log.results_path()).expect("read");
        let rows: Vec<ResultRow> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("row"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].depth_iteration, 1);
        assert_eq!(rows[0].bug_id, "Lang_1");
    }

    #[test]
    fn eval_rows_carry_reward_and_classification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = log_in(dir.path());

        log.append_eval(&EvalRow {
            attempt_id: 0,
            bug_id: "Math_5".to_string(),
            reward: false,
            classification: "Failing tests: 2".to_string(),
            width_attempt: 1,
            depth_iteration: 0,
        })
        .expect("append");

        let content = fs::read_to_string(log.eval_path()).expect("read");
        let row: EvalRow = serde_json::from_str(content.trim()).expect("row");
        assert!(!row.reward);
        assert_eq!(row.classification, "Failing tests: 2");
    }

    #[test]
    fn checkpoint_defaults_to_zero_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = log_in(dir.path());

        assert_eq!(log.load_checkpoint().expect("load"), 0);
        log.save_checkpoint(5).expect("save");
        assert_eq!(log.load_checkpoint().expect("load"), 5);
        log.save_checkpoint(7).expect("save");
        assert_eq!(log.load_checkpoint().expect("load"), 7);
    }

    #[test]
    fn checkpoints_are_kept_per_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pure = RunLog::new(dir.path(), "pure", "gpt-4o");
        let debug = RunLog::new(dir.path(), "debuginfo", "gpt-4o");

        pure.save_checkpoint(4).expect("save");
        assert_eq!(debug.load_checkpoint().expect("load"), 0);
    }

    #[test]
    fn round_record_holds_prompt_json_and_raw_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = log_in(dir.path());
        let bug = BugId::parse("Lang_1").expect("slug");
        let messages = vec![ChatMessage::system("be helpful"), ChatMessage::user("fix")];

        log.record_round(&bug, 2, 1, &messages, "```java\nint f() {}\n```")
            .expect("record");

        let path = dir.path().join("records").join("Lang_1_width2_iter1.txt");
        let content = fs::read_to_string(path).expect("read");
        assert!(content.starts_with("==== Prompt ====\n["));
        assert!(content.contains("\n\n==== Response ====\n```java"));

        let json_part = content
            .split("==== Response ====")
            .next()
            .expect("prompt part")
            .trim_start_matches("==== Prompt ====\n")
            .trim();
        let parsed: Vec<ChatMessage> = serde_json::from_str(json_part).expect("prompt json");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].role, "system");
    }

    #[test]
    fn usage_rows_share_the_run_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = log_in(dir.path());
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        };

        log.append_usage("Lang_1", 0, &usage).expect("append");
        log.append_usage("Lang_1", 0, &usage).expect("append");

        let content = fs::read_to_string(dir.path().join(USAGE_FILE)).expect("read");
        let rows: Vec<UsageRow> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("row"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].run_id, rows[1].run_id);
        assert_eq!(rows[0].total_tokens, 120);
        assert_eq!(rows[0].model, "gpt-4o");
    }
}
