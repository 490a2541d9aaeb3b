//! Extraction of candidate fixes from a model response.
//!
//! Responses are expected to carry one fenced code block whose methods are
//! introduced by `// Fixed Method N` labels. Anything else degrades to a
//! fixed sentinel per requested method; sentinels flow through validation
//! like any other candidate and fail at the compile step, so a malformed
//! response costs one round instead of special-casing the loop.

use regex::Regex;
use tracing::warn;

/// Sentinel candidate recorded when a response cannot be parsed.
pub const MATCH_FAILED: &str = "Match failed";

const FENCE_PATTERN: &str = r"(?s)```.*?\n(.*?)```";
const LABEL_PATTERN: &str = r"// Fixed Method \d+\n";
const LABEL_PREFIX_PATTERN: &str = r"^// Fixed Method \d+\n";

/// Pull exactly `expected` fixed method bodies out of a response.
///
/// The first fenced block wins when present; labels without any fence fall
/// back to parsing the whole response. A missing block or a method count
/// that does not match the request yields all sentinels.
pub fn extract_fixed_methods(response: &str, expected: usize) -> Vec<String> {
    let content = match first_fenced_block(response) {
        Some(block) => block,
        None if contains_label(response) => response.to_string(),
        None => {
            warn!("response has no code block");
            return sentinels(expected);
        }
    };

    let methods = labeled_sections(&content);
    if methods.len() != expected {
        warn!(
            expected,
            actual = methods.len(),
            "fixed method count mismatch"
        );
        return sentinels(expected);
    }
    methods
}

fn sentinels(expected: usize) -> Vec<String> {
    vec![MATCH_FAILED.to_string(); expected]
}

fn first_fenced_block(response: &str) -> Option<String> {
    let re = Regex::new(FENCE_PATTERN).ok()?;
    re.captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn contains_label(response: &str) -> bool {
    Regex::new(LABEL_PATTERN)
        .map(|re| re.is_match(response))
        .unwrap_or(false)
}

/// Slice the content at each label and strip the label line from each slice.
/// The final slice runs to the end of the content.
fn labeled_sections(content: &str) -> Vec<String> {
    let label_re = match Regex::new(LABEL_PATTERN) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let strip_re = match Regex::new(LABEL_PREFIX_PATTERN) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let starts: Vec<usize> = label_re.find_iter(content).map(|m| m.start()).collect();

    let mut sections = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(content.len());
        let section = content[start..end].trim();
        let body = strip_re.replace(section, "").trim().to_string();
        sections.push(body);
    }
    sections
}
