//! .NET (C#) exception output parser.

use super::{simple_function_name, Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// `at Ns.Class.Method(String arg) in /path/Program.cs:line 12`
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*at\s+(?P<callable>[\w.`<>\[\],+$]+)\((?P<params>[^)]*)\)(?:\s+in\s+(?P<file>.+):line\s+(?P<line>\d+))?\s*$",
    )
    .unwrap()
});

static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:Unhandled exception\.\s+)?(?P<type>[\w.]+(?:Exception|Error)):\s?(?P<msg>.*)$",
    )
    .unwrap()
});

static INNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*--->\s+(?P<inner>[\w.]+(?:Exception|Error):.*)$").unwrap()
});

const LIBRARY_PREFIXES: [&str; 4] = ["System.", "Microsoft.", "Internal.", "MS."];

pub struct CSharpParser;

impl CSharpParser {
    fn is_library_callable(callable: &str) -> bool {
        LIBRARY_PREFIXES.iter().any(|p| callable.starts_with(p))
    }
}

impl ErrorParser for CSharpParser {
    fn language(&self) -> &'static str {
        "C#"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        let has_located_frame = stderr
            .lines()
            .any(|l| FRAME_RE.captures(l).map_or(false, |c| c.name("file").is_some()));
        if has_located_frame || stderr.contains("Unhandled exception.") {
            return Confidence::High;
        }
        if stderr.lines().any(|l| ERROR_LINE_RE.is_match(l.trim_end())) {
            return Confidence::Medium;
        }
        if stderr.contains(".cs:line") || stderr.contains("System.") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception: Option<ExceptionInfo> = None;
        let mut frames = Vec::new();

        for line in stderr.lines() {
            if let Some(caps) = FRAME_RE.captures(line) {
                let callable = caps.name("callable").map(|m| m.as_str()).unwrap_or_default();
                let function_name = simple_function_name(callable);
                let class_name = callable
                    .rfind('.')
                    .map(|idx| callable[..idx].to_string())
                    .filter(|c| !c.is_empty());
                frames.push(StackFrame {
                    file_path: caps.name("file").map(|m| PathBuf::from(m.as_str().trim())),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: None,
                    function_name: Some(function_name),
                    class_name,
                    is_user_code: !Self::is_library_callable(callable),
                    snippet: None,
                });
                continue;
            }
            if let Some(caps) = INNER_RE.captures(line) {
                if let Some(exc) = exception.take() {
                    exception = Some(exc.with_cause(
                        caps.name("inner").map(|m| m.as_str()).unwrap_or_default(),
                    ));
                }
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
