//! Bounded readers for pre-existing debug-trace files.
//!
//! Traces are produced offline by an instrumented test run and consumed
//! here as plain files. Reads are size-capped so a pathological trace can
//! never blow up a prompt, and every failure degrades to an explanatory
//! placeholder string; a missing trace must never abort a repair round.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dataset::BugId;

const MAX_TRACE_BYTES: u64 = 50 * 1024;
const MAX_TRACE_LINES: usize = 300;
const MAX_CALL_ENTRIES: usize = 300;

/// Locations of the two trace inputs for one round.
#[derive(Debug, Clone)]
pub struct TraceFiles {
    pub debug_info: PathBuf,
    pub method_calls: PathBuf,
}

/// Trace paths are keyed by (project, bug id, width, iteration): iteration 0
/// uses the static per-bug extracts, later iterations use the dynamic files
/// regenerated between refinement rounds.
pub fn trace_files(
    debug_info_dir: &Path,
    method_calls_dir: &Path,
    dynamic_dir: &Path,
    bug: &BugId,
    width: u32,
    iteration: u32,
) -> TraceFiles {
    let slug = bug.slug();
    if iteration == 0 {
        TraceFiles {
            debug_info: debug_info_dir.join(format!("{slug}b.txt")),
            method_calls: method_calls_dir.join(format!("{slug}b_method_calls.json")),
        }
    } else {
        TraceFiles {
            debug_info: dynamic_dir.join("DebugInfo").join(format!(
                "{}_{}_width{}_iter{}.txt",
                bug.project, bug.number, width, iteration
            )),
            method_calls: dynamic_dir.join("MethodCalls").join(format!(
                "{}_{}_iter{}_method_calls.json",
                bug.project, bug.number, iteration
            )),
        }
    }
}

/// Read an execution trace, whole when small, first lines otherwise.
pub fn read_debug_info(path: &Path) -> String {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return "Failed to read debug info: File not found".to_string();
        }
        Err(err) => return format!("Failed to read debug info: {err}"),
    };

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return "Failed to read debug info: File not found".to_string();
        }
        Err(err) => return format!("Failed to read debug info: {err}"),
    };

    if size <= MAX_TRACE_BYTES {
        content.trim().to_string()
    } else {
        content
            .lines()
            .take(MAX_TRACE_LINES)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct MethodCallRecord {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    doc: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Read the called-methods context file and render it for the prompt.
pub fn read_method_calls(path: &Path) -> String {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return "Failed to read method calls: File not found".to_string();
        }
        Err(err) => return format!("Failed to read method calls: {err}"),
    };

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return "Failed to read method calls: File not found".to_string();
        }
        Err(err) => return format!("Failed to read method calls: {err}"),
    };

    let records = if size <= MAX_TRACE_BYTES {
        match serde_json::from_str::<Vec<MethodCallRecord>>(&content) {
            Ok(records) => records,
            Err(_) => return "Failed to read method calls: Invalid JSON format".to_string(),
        }
    } else {
        match parse_bounded_records(&content) {
            Some(records) => records,
            None => return "Failed to read method calls: Invalid JSON format".to_string(),
        }
    };

    render_method_calls(&records)
}

// Oversized files are usually JSONL; fall back to a truncated array parse
// when a line refuses to decode on its own.
fn parse_bounded_records(content: &str) -> Option<Vec<MethodCallRecord>> {
    let mut records = Vec::new();
    for line in content.lines().take(MAX_CALL_ENTRIES) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<MethodCallRecord>(line) {
            Ok(record) => records.push(record),
            Err(_) => {
                let mut full = serde_json::from_str::<Vec<MethodCallRecord>>(content).ok()?;
                full.truncate(MAX_CALL_ENTRIES);
                return Some(full);
            }
        }
    }
    Some(records)
}

fn render_method_calls(records: &[MethodCallRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!(
            "Method: {}\n",
            record.method.as_deref().unwrap_or("Unknown")
        ));
        out.push_str(&format!(
            "Comment:\n    {}\n",
            record.doc.as_deref().unwrap_or("No comment")
        ));
        out.push_str(&format!(
            "Source Code:\n    {}\n\n",
            record.code.as_deref().unwrap_or("No code")
        ));
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn static_and_dynamic_paths_follow_the_keying() {
        let bug = BugId::parse("Lang_1").expect("slug");
        let files = trace_files(
            Path::new("/traces/debug"),
            Path::new("/traces/calls"),
            Path::new("/traces/dyn"),
            &bug,
            2,
            0,
        );
        assert_eq!(files.debug_info, Path::new("/traces/debug/Lang_1b.txt"));
        assert_eq!(
            files.method_calls,
            Path::new("/traces/calls/Lang_1b_method_calls.json")
        );

        let files = trace_files(
            Path::new("/traces/debug"),
            Path::new("/traces/calls"),
            Path::new("/traces/dyn"),
            &bug,
            2,
            3,
        );
        assert_eq!(
            files.debug_info,
            Path::new("/traces/dyn/DebugInfo/Lang_1_width2_iter3.txt")
        );
        assert_eq!(
            files.method_calls,
            Path::new("/traces/dyn/MethodCalls/Lang_1_iter3_method_calls.json")
        );
    }

    #[test]
    fn small_trace_reads_whole_and_trims() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Lang_1b.txt");
        fs::write(&path, "\nline one\nline two\n\n").expect("write");
        assert_eq!(read_debug_info(&path), "line one\nline two");
    }

    #[test]
    fn oversized_trace_truncates_to_line_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.txt");
        let line = "x".repeat(200);
        let content: Vec<String> = (0..400).map(|i| format!("  {i} {line}")).collect();
        fs::write(&path, content.join("\n")).expect("write");

        let out = read_debug_info(&path);
        assert_eq!(out.lines().count(), MAX_TRACE_LINES);
        // Per-line trimming happens on the truncated path.
        assert!(out.starts_with("0 "));
    }

    #[test]
    fn missing_trace_degrades_to_placeholder() {
        assert_eq!(
            read_debug_info(Path::new("/no/such/trace.txt")),
            "Failed to read debug info: File not found"
        );
        assert_eq!(
            read_method_calls(Path::new("/no/such/calls.json")),
            "Failed to read method calls: File not found"
        );
    }

    #[test]
    fn method_calls_render_with_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calls.json");
        fs::write(
            &path,
            r#"[
                {"method": "org.example.Line.intersection", "doc": "/** docs */", "code": "int f() {}"},
                {"method": "org.example.Line.toSubSpace"}
            ]"#,
        )
        .expect("write");

        let out = read_method_calls(&path);
        assert!(out.starts_with("Method: org.example.Line.intersection\nComment:\n    /** docs */"));
        assert!(out.contains("Source Code:\n    int f() {}"));
        assert!(out.contains("Method: org.example.Line.toSubSpace\nComment:\n    No comment"));
        assert!(out.ends_with("Source Code:\n    No code"));
    }

    #[test]
    fn invalid_method_calls_json_degrades_to_placeholder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calls.json");
        fs::write(&path, "not json at all").expect("write");
        assert_eq!(
            read_method_calls(&path),
            "Failed to read method calls: Invalid JSON format"
        );
    }

    #[test]
    fn oversized_jsonl_method_calls_keep_entry_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calls.json");
        let row = format!(
            r#"{{"method": "m", "doc": "d", "code": "{}"}}"#,
            "c".repeat(200)
        );
        let content: Vec<String> = (0..400).map(|_| row.clone()).collect();
        fs::write(&path, content.join("\n")).expect("write");

        let out = read_method_calls(&path);
        assert_eq!(out.matches("Method: m").count(), MAX_CALL_ENTRIES);
    }
}
