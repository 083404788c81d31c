//! Bounded source windows around a crash site.
//!
//! The reader never fails loudly: anything it cannot serve (missing file,
//! bad encoding, line past EOF) comes back as `None` and the pipeline
//! simply proceeds without source context.

use crate::encoding;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files larger than this are never read for context.
const MAX_SOURCE_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// One line inside a [`SourceSnippet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetLine {
    /// 1-based line number in the file.
    pub number: u32,
    pub content: String,
    pub is_error_line: bool,
}

/// A window of file text centered on the error line. Exactly one line has
/// `is_error_line` set, and its number equals `error_line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnippet {
    pub file_path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub error_line: u32,
    pub lines: Vec<SnippetLine>,
}

impl SourceSnippet {
    /// Raw line contents joined by `\n`, no gutters or markers.
    pub fn raw_code(&self) -> String {
        let contents: Vec<&str> = self.lines.iter().map(|l| l.content.as_str()).collect();
        contents.join("\n")
    }
}

/// Read a window of `window` lines either side of `error_line` (1-based).
///
/// Relative paths resolve against the process working directory, falling
/// back to the path as given. Returns `None` on any I/O or decode failure.
pub fn read_context(path: &Path, error_line: u32, window: u32) -> Option<SourceSnippet> {
    if path.as_os_str().is_empty() || error_line == 0 || window == 0 {
        return None;
    }

    let resolved = resolve_path(path);

    match fs::metadata(&resolved) {
        Ok(meta) if meta.len() > MAX_SOURCE_FILE_BYTES => {
            debug!(path = %resolved.display(), size = meta.len(), "source file too large for context");
            return None;
        }
        Ok(_) => {}
        Err(_) => return None,
    }

    let bytes = fs::read(&resolved).ok()?;
    let decoded = encoding::decode(&bytes)?;

    let mut lines = encoding::split_lines(&decoded.text);
    // A trailing terminator yields an empty final fragment; it is not a line.
    if lines.len() > 1 && lines.last() == Some(&"") {
        lines.pop();
    }

    let total = lines.len() as u32;
    if error_line > total {
        return None;
    }

    let (start, end) = center_window(error_line, window, total);

    let snippet_lines: Vec<SnippetLine> = (start..=end)
        .map(|number| SnippetLine {
            number,
            content: lines[(number - 1) as usize].to_string(),
            is_error_line: number == error_line,
        })
        .collect();

    Some(SourceSnippet {
        file_path: resolved,
        start_line: start,
        end_line: end,
        error_line,
        lines: snippet_lines,
    })
}

fn resolve_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => {
            let joined = cwd.join(path);
            if joined.exists() {
                joined
            } else {
                path.to_path_buf()
            }
        }
        Err(_) => path.to_path_buf(),
    }
}

/// Clamp `[error_line - window, error_line + window]` to `[1, total]`,
/// extending the unclamped side so the window keeps its intended size when
/// the file has room.
fn center_window(error_line: u32, window: u32, total: u32) -> (u32, u32) {
    let ideal_low = error_line.saturating_sub(window).max(1);
    let ideal_high = (error_line + window).min(total);

    let span = 2 * window;
    let mut low = ideal_low;
    let mut high = ideal_high;

    if error_line.saturating_sub(window) < 1 {
        // Low end hit the top of the file; give the extra room to the bottom.
        high = (1 + span).min(total);
    }
    if error_line + window > total {
        // High end hit EOF; give the extra room to the top.
        low = total.saturating_sub(span).max(1);
    }

    (low, high)
}
