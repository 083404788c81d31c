//! CPython traceback parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File "(?P<file>[^"]+)", line (?P<line>\d+)(?:, in (?P<func>.+))?\s*$"#)
        .unwrap()
});

static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<type>[A-Za-z_][\w.]*(?:Error|Exception|Warning|Interrupt|Exit|Iteration))(?::\s?(?P<msg>.*))?$").unwrap()
});

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";
const CHAIN_MARKERS: [&str; 2] = [
    "During handling of the above exception, another exception occurred:",
    "The above exception was the direct cause of the following exception:",
];

const LIBRARY_MARKERS: [&str; 4] = ["site-packages/", "dist-packages/", "/lib/python", "<frozen "];

const COMMON_TYPES: [&str; 8] = [
    "ZeroDivisionError",
    "TypeError",
    "ValueError",
    "KeyError",
    "IndexError",
    "AttributeError",
    "NameError",
    "ImportError",
];

pub struct PythonParser;

impl PythonParser {
    fn is_library_path(path: &str) -> bool {
        LIBRARY_MARKERS.iter().any(|m| path.contains(m)) || path.starts_with('<')
    }
}

impl ErrorParser for PythonParser {
    fn language(&self) -> &'static str {
        "Python"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        if stderr.contains(TRACEBACK_HEADER) {
            return Confidence::High;
        }
        if stderr.lines().any(|l| FRAME_RE.is_match(l)) {
            return Confidence::Medium;
        }
        if COMMON_TYPES.iter().any(|t| stderr.contains(t)) || stderr.contains(".py\"") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut frames = Vec::new();
        let mut error_lines: Vec<ExceptionInfo> = Vec::new();
        let mut chained = false;

        for line in stderr.lines() {
            if let Some(caps) = FRAME_RE.captures(line) {
                let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                let line_no = caps.name("line").and_then(|m| m.as_str().parse().ok());
                frames.push(StackFrame {
                    file_path: Some(PathBuf::from(file)),
                    line: line_no,
                    column: None,
                    function_name: caps.name("func").map(|m| m.as_str().trim().to_string()),
                    class_name: None,
                    is_user_code: !Self::is_library_path(file),
                    snippet: None,
                });
                continue;
            }
            if CHAIN_MARKERS.iter().any(|m| line.trim() == *m) {
                chained = true;
                continue;
            }
            // Source-echo lines inside a traceback are indented; the
            // anchored regex only matches error lines at column zero.
            if let Some(caps) = ERROR_LINE_RE.captures(line.trim_end()) {
                let exception_type = caps.name("type").map(|m| m.as_str()).unwrap_or_default();
                let message = caps.name("msg").map(|m| m.as_str()).unwrap_or_default();
                error_lines.push(ExceptionInfo::new(exception_type, message));
            }
        }

        // The last reported exception is the one the process died with; in a
        // chained traceback the first becomes the inner cause.
        let inner = if chained && error_lines.len() >= 2 {
            error_lines.first().cloned()
        } else {
            None
        };
        let exception = error_lines.pop().map(|last| match inner {
            Some(inner) => {
                last.with_cause(format!("{}: {}", inner.exception_type, inner.message))
            }
            None => last,
        });

        ParseResult::from_parts(exception, frames, stderr)
    }
}
