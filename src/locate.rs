//! Locates a previously recorded method body inside the current text of a
//! source file.
//!
//! Matching is line-oriented and blank-line tolerant: only trimmed non-blank
//! lines are compared, so formatting drift that adds or removes empty lines
//! does not break the match, while the code tokens themselves must match
//! exactly.

/// Find the line range `[start, end)` occupied by `original_method` inside
/// `content`.
///
/// The window length equals the original method's total line count (blank
/// lines included); a window matches when its trimmed non-blank lines equal
/// the original's trimmed non-blank lines. The first matching window wins,
/// so identical duplicate bodies (e.g. overloads with the same text) resolve
/// to the earliest occurrence. Returns `None` when no window matches.
pub fn find_method_window(content: &str, original_method: &str) -> Option<(usize, usize)> {
    let tag: Vec<&str> = non_blank_trimmed(original_method).collect();
    let content_lines: Vec<&str> = content.lines().collect();
    let span = original_method.lines().count();

    if span > content_lines.len() {
        return None;
    }

    for start in 0..=(content_lines.len() - span) {
        let window = &content_lines[start..start + span];
        let window_tag = window.iter().map(|l| l.trim()).filter(|l| !l.is_empty());
        if window_tag.eq(tag.iter().copied()) {
            return Some((start, start + span));
        }
    }

    None
}

fn non_blank_trimmed(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::find_method_window;

    const FILE: &str = r#"package org.example;

public class Box {

    private int size;

    public int getSize() {
        return size;
    }

    public void setSize(int size) {
        this.size = size;
    }
}
"#;

    #[test]
    fn finds_method_in_middle_of_file() {
        let method = "    public int getSize() {\n        return size;\n    }";
        let (start, end) = find_method_window(FILE, method).expect("method should be found");
        assert_eq!(end - start, 3);
        let lines: Vec<&str> = FILE.lines().collect();
        assert_eq!(lines[start].trim(), "public int getSize() {");
        assert_eq!(lines[end - 1].trim(), "}");
    }

    #[test]
    fn tolerates_blank_line_drift_within_window() {
        // Recorded text has a blank line the file no longer has; the file has
        // a trailing blank inside the window instead. Non-blank content is
        // identical, so the match must still land.
        let content = "int a() {\n    return 1;\n}\n\nint b() {\n    return 2;\n}\n";
        let method = "int a() {\n\n    return 1;\n}";
        let (start, end) = find_method_window(content, method).expect("drifted method should match");
        assert_eq!((start, end), (0, 4));
    }

    #[test]
    fn indentation_differences_are_ignored() {
        let method = "public void setSize(int size) {\nthis.size = size;\n}";
        assert!(find_method_window(FILE, method).is_some());
    }

    #[test]
    fn returns_none_when_absent() {
        let method = "    public int getWidth() {\n        return width;\n    }";
        assert_eq!(find_method_window(FILE, method), None);
    }

    #[test]
    fn returns_none_when_method_longer_than_file() {
        let method = "a\nb\nc\nd\ne";
        assert_eq!(find_method_window("a\nb", method), None);
    }

    #[test]
    fn token_mismatch_is_not_a_match() {
        let method = "    public int getSize() {\n        return size + 1;\n    }";
        assert_eq!(find_method_window(FILE, method), None);
    }

    #[test]
    fn first_of_identical_duplicates_wins() {
        let content = "int f() {\n    return 0;\n}\nint f() {\n    return 0;\n}\n";
        let method = "int f() {\n    return 0;\n}";
        assert_eq!(find_method_window(content, method), Some((0, 3)));
    }

    #[test]
    fn window_covers_original_line_count_including_blanks() {
        let content = "start\nint g() {\n    call();\n}\nend\n";
        // Original recorded with a trailing blank line: the span is 4 even
        // though only 3 lines carry content.
        let method = "int g() {\n    call();\n}\n\n";
        // "end" is non-blank, so the 4-line window starting at line 1 holds
        // an extra content line and must not match.
        assert_eq!(find_method_window(content, method), None);
        // With a blank line after the method the window fits.
        let content = "start\nint g() {\n    call();\n}\n\nend\n";
        assert_eq!(find_method_window(content, method), Some((1, 5)));
    }
}
