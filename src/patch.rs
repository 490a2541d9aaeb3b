//! Applies candidate method replacements to source files.
//!
//! Replacements for one file are resolved sequentially in memory, each locate
//! running against the content left by the previous replacement, and the file
//! is written exactly once after every replacement has resolved. A single
//! locate miss abandons the whole file update before anything touches disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::locate::find_method_window;

#[derive(Debug, Error)]
pub enum ApplyError {
    /// A recorded original method is not present in the file content as it
    /// stands at that point in the replacement sequence.
    #[error("Locate failed: Could not find method in {path}")]
    LocateFailed { path: String },
    #[error("File not found: {path}")]
    FileNotFound { path: String },
    #[error("File is not writable: {path}")]
    NotWritable { path: String },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// One (original method text, candidate fix text) pair.
pub type Replacement = (String, String);

/// Read a source file as UTF-8, falling back to a Latin-1 style decoding for
/// the odd legacy-encoded Defects4J source.
pub fn read_source(path: &Path) -> Result<String, ApplyError> {
    let bytes = fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ApplyError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            ApplyError::Read {
                path: path.display().to_string(),
                source,
            }
        }
    })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => Ok(decode_latin1(err.as_bytes())),
    }
}

// ISO-8859-1 maps every byte to the code point of the same value.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Apply `replacements` to `content` in order, returning the new content.
/// `path_label` only feeds error messages.
pub fn apply_replacements(
    content: &str,
    replacements: &[Replacement],
    path_label: &str,
) -> Result<String, ApplyError> {
    let mut current = content.to_string();

    for (original, fixed) in replacements {
        let (start, end) =
            find_method_window(&current, original).ok_or_else(|| ApplyError::LocateFailed {
                path: path_label.to_string(),
            })?;

        let lines: Vec<&str> = current.lines().collect();
        let mut next: Vec<&str> = Vec::with_capacity(lines.len());
        next.extend_from_slice(&lines[..start]);
        next.extend(fixed.split('\n'));
        next.extend_from_slice(&lines[end..]);
        current = next.join("\n");
    }

    Ok(current)
}

/// Read `path`, apply all replacements, and overwrite the file. The write
/// happens only when every replacement resolved.
pub fn apply_to_file(path: &Path, replacements: &[Replacement]) -> Result<(), ApplyError> {
    let content = read_source(path)?;
    let updated = apply_replacements(&content, replacements, &path.display().to_string())?;
    write_source(path, &updated)
}

fn write_source(path: &Path, content: &str) -> Result<(), ApplyError> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.permissions().readonly() {
            return Err(ApplyError::NotWritable {
                path: path.display().to_string(),
            });
        }
    }
    fs::write(path, content).map_err(|source| ApplyError::Write {
        path: path.display().to_string(),
        source,
    })
}
