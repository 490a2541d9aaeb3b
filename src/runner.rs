//! Runs the external Defects4J test command under a wall-clock deadline.
//!
//! The child is spawned with piped output, drained on reader threads so a
//! full pipe can never wedge it, and polled against an explicit deadline.
//! On expiry the child is killed and reaped before the call returns. The
//! reader threads are not joined in that case: a grandchild (ant, a JVM)
//! may still hold the pipe open, and the round's classification is already
//! decided, so whatever output was captured so far is snapshotted instead.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Default budget for a full `defects4j test` run.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(1200);
/// Default budget for single-test runs on the trace-collection side.
pub const SINGLE_TEST_TIMEOUT: Duration = Duration::from_secs(900);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of one external test invocation.
#[derive(Debug)]
pub struct TestRun {
    pub status: Option<ExitStatus>,
    /// Combined stdout and stderr.
    pub output: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Run `<runner> test` in `work_dir`.
pub fn run_tests(runner: &str, work_dir: &Path, timeout: Duration) -> std::io::Result<TestRun> {
    let mut cmd = Command::new(runner);
    cmd.arg("test").current_dir(work_dir);
    run_with_deadline(cmd, timeout)
}

/// Run `<runner> test -t <test>` in `work_dir` for a single test method.
pub fn run_single_test(
    runner: &str,
    work_dir: &Path,
    test: &str,
    timeout: Duration,
) -> std::io::Result<TestRun> {
    let mut cmd = Command::new(runner);
    cmd.args(["test", "-t", test]).current_dir(work_dir);
    run_with_deadline(cmd, timeout)
}

fn run_with_deadline(mut cmd: Command, timeout: Duration) -> std::io::Result<TestRun> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    let stdout = PipeCapture::start(child.stdout.take());
    let stderr = PipeCapture::start(child.stderr.take());

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break Some(status),
            None => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    warn!(elapsed = ?start.elapsed(), "test command hit deadline, killing child");
                    let _ = child.kill();
                    break child.wait().ok();
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    // Join the readers only when the child exited on its own; EOF is then
    // guaranteed once every writer is gone.
    let wait_for_eof = !timed_out;
    let mut output = stdout.finish(wait_for_eof);
    let stderr_text = stderr.finish(wait_for_eof);
    if !stderr_text.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&stderr_text);
    }

    let elapsed = start.elapsed();
    debug!(?elapsed, timed_out, status = ?status, "test command finished");

    Ok(TestRun {
        status,
        output,
        timed_out,
        elapsed,
    })
}

struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeCapture {
    fn start(pipe: Option<impl Read + Send + 'static>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut bytes) = sink.lock() {
                            bytes.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, handle }
    }

    fn finish(self, wait_for_eof: bool) -> String {
        if wait_for_eof {
            let _ = self.handle.join();
        }
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).to_string()
    }
}
