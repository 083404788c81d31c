//! Go panic / goroutine dump parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static PANIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^panic:\s?(?P<msg>.*?)(?:\s+\[recovered\])?\s*$").unwrap());

static GOROUTINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^goroutine \d+ \[[\w ,]+\]:$").unwrap());

// `main.(*Server).handle(0xc000010000)` is a call line that is followed by an
// indented `\t/path/file.go:42 +0x1d` location line.
static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<func>[\w.\-/*()]+)\(.*\)$").unwrap());

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\t(?P<file>\S+\.go):(?P<line>\d+)(?:\s+\+0x[0-9a-f]+)?$").unwrap()
});

const LIBRARY_MARKERS: [&str; 4] = ["/go/src/", "/pkg/mod/", "/usr/local/go/", "/libexec/src/"];

pub struct GoParser;

impl GoParser {
    fn is_library_frame(func: &str, file: &str) -> bool {
        func.starts_with("runtime.") || LIBRARY_MARKERS.iter().any(|m| file.contains(m))
    }

    /// `main.(*Server).handle` yields function `handle` and class `Server`.
    fn split_callable(raw: &str) -> (Option<String>, Option<String>) {
        let segments: Vec<&str> = raw.split('.').collect();
        let func = segments.last().map(|s| s.to_string());
        let class = segments
            .iter()
            .rev()
            .nth(1)
            .and_then(|s| s.strip_prefix("(*").or_else(|| s.strip_prefix('(')))
            .and_then(|s| s.strip_suffix(')'))
            .map(|s| s.to_string());
        (func, class)
    }
}

impl ErrorParser for GoParser {
    fn language(&self) -> &'static str {
        "Go"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        let has_panic = stderr.lines().any(|l| PANIC_RE.is_match(l));
        let has_goroutine = stderr.lines().any(|l| GOROUTINE_RE.is_match(l));
        if has_panic || has_goroutine {
            return Confidence::High;
        }
        if stderr.lines().any(|l| LOCATION_RE.is_match(l)) {
            return Confidence::Medium;
        }
        if stderr.contains(".go:") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception = None;
        let mut frames: Vec<StackFrame> = Vec::new();
        // Raw callable text from the line preceding a location line.
        let mut pending_call: Option<String> = None;

        for line in stderr.lines() {
            if exception.is_none() {
                if let Some(caps) = PANIC_RE.captures(line) {
                    exception = Some(ExceptionInfo::new(
                        "panic",
                        caps.name("msg").map(|m| m.as_str()).unwrap_or_default(),
                    ));
                    continue;
                }
            }
            if GOROUTINE_RE.is_match(line) {
                pending_call = None;
                continue;
            }
            if let Some(caps) = LOCATION_RE.captures(line) {
                let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                let raw_callable = pending_call.take().unwrap_or_default();
                let (function_name, class_name) = if raw_callable.is_empty() {
                    (None, None)
                } else {
                    Self::split_callable(&raw_callable)
                };
                frames.push(StackFrame {
                    file_path: Some(PathBuf::from(file)),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: None,
                    function_name,
                    class_name,
                    is_user_code: !Self::is_library_frame(&raw_callable, file),
                    snippet: None,
                });
                continue;
            }
            if let Some(caps) = CALL_RE.captures(line) {
                pending_call = caps.name("func").map(|m| m.as_str().to_string());
            }
        }

        ParseResult::from_parts(exception, frames, stderr)
    }
}
