//! Loading and shaping of the buggy-method dataset.
//!
//! Samples arrive as JSONL, one object per line. Bugs are processed in
//! sorted slug order so run ids and checkpoints stay stable across restarts.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One Defects4J bug: project tag plus numeric id, e.g. `Lang_1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugId {
    pub project: String,
    pub number: u32,
}

impl BugId {
    /// Split a slug on its last underscore, e.g. `Closure_11` or
    /// `JacksonDatabind_5`. Returns `None` when the trailing segment is not
    /// a number.
    pub fn parse(slug: &str) -> Option<Self> {
        let (project, number) = slug.rsplit_once('_')?;
        let number = number.parse().ok()?;
        Some(Self {
            project: project.to_string(),
            number,
        })
    }

    pub fn slug(&self) -> String {
        format!("{}_{}", self.project, self.number)
    }
}

impl fmt::Display for BugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.project, self.number)
    }
}

/// One buggy method extracted from a Defects4J checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodSample {
    pub slug: String,
    /// Source file path, relative to the bug's working tree.
    pub class_path: String,
    pub buggy_code: String,
    #[serde(default)]
    pub doc: Option<String>,
}

/// Recorded exception text for one bug, used by exception mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionNote {
    pub slug: String,
    pub exception_info: String,
}

/// Parse a JSONL file of [`MethodSample`] rows.
pub fn load_samples(path: &Path) -> Result<Vec<MethodSample>> {
    read_jsonl(path).with_context(|| format!("loading samples from {}", path.display()))
}

/// Parse a JSONL file of [`ExceptionNote`] rows.
pub fn load_exceptions(path: &Path) -> Result<Vec<ExceptionNote>> {
    read_jsonl(path).with_context(|| format!("loading exception info from {}", path.display()))
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).with_context(|| format!("line {}", idx + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Group samples by slug, sorted lexicographically by slug.
pub fn group_by_slug(samples: Vec<MethodSample>) -> Vec<(String, Vec<MethodSample>)> {
    let mut groups: BTreeMap<String, Vec<MethodSample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.slug.clone()).or_default().push(sample);
    }
    groups.into_iter().collect()
}

/// Drop samples whose whitespace-collapsed buggy code duplicates an earlier
/// sample in the same group. No two samples driving one repair round may
/// have equal normalized bodies.
pub fn merge_samples(samples: Vec<MethodSample>) -> Vec<MethodSample> {
    let mut seen = HashSet::new();
    samples
        .into_iter()
        .filter(|sample| seen.insert(collapse_whitespace(&sample.buggy_code)))
        .collect()
}

fn collapse_whitespace(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Exception text for `slug`, or a placeholder when none is recorded.
pub fn exception_for(notes: &[ExceptionNote], slug: &str) -> String {
    notes
        .iter()
        .find(|n| n.slug == slug)
        .map(|n| n.exception_info.trim().to_string())
        .unwrap_or_else(|| "No exception info available".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(slug: &str, code: &str) -> MethodSample {
        MethodSample {
            slug: slug.to_string(),
            class_path: "src/java/org/example/Example.java".to_string(),
            buggy_code: code.to_string(),
            doc: None,
        }
    }

    #[test]
    fn bug_id_parses_and_round_trips() {
        let bug = BugId::parse("Lang_1").expect("valid slug");
        assert_eq!(bug.project, "Lang");
        assert_eq!(bug.number, 1);
        assert_eq!(bug.slug(), "Lang_1");

        let bug = BugId::parse("JacksonDatabind_57").expect("valid slug");
        assert_eq!(bug.project, "JacksonDatabind");
        assert_eq!(bug.number, 57);
    }

    #[test]
    fn bug_id_rejects_malformed_slugs() {
        assert!(BugId::parse("Lang").is_none());
        assert!(BugId::parse("Lang_x").is_none());
        assert!(BugId::parse("").is_none());
    }

    #[test]
    fn grouping_sorts_by_slug_and_keeps_sample_order() {
        let samples = vec![
            sample("Math_5", "int a;"),
            sample("Chart_1", "int b;"),
            sample("Math_5", "int c;"),
        ];
        let groups = group_by_slug(samples);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Chart_1");
        assert_eq!(groups[1].0, "Math_5");
        assert_eq!(groups[1].1.len(), 2);
        assert_eq!(groups[1].1[0].buggy_code, "int a;");
    }

    #[test]
    fn merge_drops_whitespace_equal_duplicates() {
        let samples = vec![
            sample("Lang_1", "int f() {\n    return 1;\n}"),
            sample("Lang_1", "int f() {  \n\treturn 1;   \n}\n"),
            sample("Lang_1", "int g() { return 2; }"),
        ];
        let merged = merge_samples(samples);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].buggy_code, "int f() {\n    return 1;\n}");
        assert_eq!(merged[1].buggy_code, "int g() { return 2; }");
    }

    #[test]
    fn jsonl_loading_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"{{"slug":"Lang_1","class_path":"src/A.java","buggy_code":"int a;"}}"#
        )
        .expect("write row");
        writeln!(file).expect("blank line");
        writeln!(
            file,
            r#"{{"slug":"Lang_2","class_path":"src/B.java","buggy_code":"int b;","doc":"docs"}}"#
        )
        .expect("write row");

        let rows = load_samples(file.path()).expect("load");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].doc.as_deref(), Some("docs"));
    }

    #[test]
    fn exception_lookup_degrades_to_placeholder() {
        let notes = vec![ExceptionNote {
            slug: "Lang_1".to_string(),
            exception_info: " java.lang.NullPointerException \n".to_string(),
        }];
        assert_eq!(
            exception_for(&notes, "Lang_1"),
            "java.lang.NullPointerException"
        );
        assert_eq!(
            exception_for(&notes, "Math_9"),
            "No exception info available"
        );
    }
}
