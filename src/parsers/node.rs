//! Node.js / V8 stack trace parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// `at fn (path:line:col)` and the bare `at path:line:col` form.
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+at\s+(?:(?P<func>[^(]+?)\s+\()?(?P<file>[^()\s][^()]*?):(?P<line>\d+):(?P<col>\d+)\)?\s*$")
        .unwrap()
});

static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Uncaught\s+)?(?P<type>[A-Z][A-Za-z]*(?:Error|Exception)):\s?(?P<msg>.*)$")
        .unwrap()
});

const LIBRARY_MARKERS: [&str; 3] = ["node_modules/", "node:", "internal/"];

pub struct NodeParser;

impl NodeParser {
    fn is_library_path(path: &str) -> bool {
        LIBRARY_MARKERS.iter().any(|m| path.contains(m))
    }

    /// `Object.foo` keeps `foo` as the function and `Object` as the class;
    /// `new Foo` and `async bar` lose their keyword prefix.
    fn split_callable(raw: &str) -> (Option<String>, Option<String>) {
        let cleaned = raw
            .trim()
            .trim_start_matches("async ")
            .trim_start_matches("new ")
            .trim();
        if cleaned.is_empty() {
            return (None, None);
        }
        match cleaned.rfind('.') {
            Some(idx) if idx > 0 => {
                let class = &cleaned[..idx];
                let func = &cleaned[idx + 1..];
                (Some(func.to_string()), Some(class.to_string()))
            }
            _ => (Some(cleaned.to_string()), None),
        }
    }
}

impl ErrorParser for NodeParser {
    fn language(&self) -> &'static str {
        "JavaScript"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        if stderr.lines().any(|l| FRAME_RE.is_match(l)) {
            return Confidence::High;
        }
        if stderr.lines().any(|l| ERROR_LINE_RE.is_match(l.trim_end())) {
            return Confidence::Medium;
        }
        if stderr.contains("node_modules") || stderr.contains(".js:") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception = None;
        let mut frames = Vec::new();

        for line in stderr.lines() {
            if let Some(caps) = FRAME_RE.captures(line) {
                let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                let (function_name, class_name) = caps
                    .name("func")
                    .map(|m| Self::split_callable(m.as_str()))
                    .unwrap_or((None, None));
                frames.push(StackFrame {
                    file_path: Some(PathBuf::from(file)),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
                    function_name,
                    class_name,
                    is_user_code: !Self::is_library_path(file),
                    snippet: None,
                });
                continue;
            }
            if exception.is_none() {
                if let Some(caps) = ERROR_LINE_RE.captures(line.trim_end()) {
                    exception = Some(ExceptionInfo::new(
                        caps.name("type").map(|m| m.as_str()).unwrap_or_default(),
                        caps.name("msg").map(|m| m.as_str()).unwrap_or_default(),
                    ));
                }
            }
        }

        ParseResult::from_parts(exception, frames, stderr)
    }
}
