//! Ruby exception backtrace parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// app.rb:5:in `divide': divided by 0 (ZeroDivisionError)
static HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^:\s][^:]*):(?P<line>\d+):in [`'](?P<func>[^']+)'(?::\s(?P<msg>.*)\s\((?P<type>[A-Z]\w*)\))?\s*$",
    )
    .unwrap()
});

// \tfrom app.rb:10:in `main'
static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from (?P<file>[^:\s][^:]*):(?P<line>\d+):in [`'](?P<func>[^']+)'\s*$")
        .unwrap()
});

const LIBRARY_MARKERS: [&str; 3] = ["/gems/", "/ruby/", "/rubygems/"];

pub struct RubyParser;

impl RubyParser {
    fn is_library_path(path: &str) -> bool {
        LIBRARY_MARKERS.iter().any(|m| path.contains(m))
    }

    /// `block in main` and `block (2 levels) in main` report the enclosing
    /// method.
    fn clean_func(raw: &str) -> String {
        match raw.rfind(" in ") {
            Some(idx) => raw[idx + 4..].to_string(),
            None => raw.to_string(),
        }
    }
}

impl ErrorParser for RubyParser {
    fn language(&self) -> &'static str {
        "Ruby"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        let head = stderr
            .lines()
            .any(|l| HEAD_RE.captures(l).map_or(false, |c| c.name("type").is_some()));
        if head {
            return Confidence::High;
        }
        if stderr.lines().any(|l| FROM_RE.is_match(l)) {
            return Confidence::Medium;
        }
        if stderr.contains(".rb:") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception = None;
        let mut frames = Vec::new();

        for line in stderr.lines() {
            if let Some(caps) = FROM_RE.captures(line) {
                let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                frames.push(StackFrame {
                    file_path: Some(PathBuf::from(file)),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: None,
                    function_name: caps.name("func").map(|m| Self::clean_func(m.as_str())),
                    class_name: None,
                    is_user_code: !Self::is_library_path(file),
                    snippet: None,
                });
                continue;
            }
            if let Some(caps) = HEAD_RE.captures(line) {
                let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                if exception.is_none() {
                    if let (Some(msg), Some(ty)) = (caps.name("msg"), caps.name("type")) {
                        exception =
                            Some(ExceptionInfo::new(ty.as_str(), msg.as_str().trim()));
                    }
                }
                frames.push(StackFrame {
                    file_path: Some(PathBuf::from(file)),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: None,
                    function_name: caps.name("func").map(|m| Self::clean_func(m.as_str())),
                    class_name: None,
                    is_user_code: !Self::is_library_path(file),
                    snippet: None,
                });
            }
        }

        ParseResult::from_parts(exception, frames, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "app.rb:5:in `divide': divided by 0 (ZeroDivisionError)\n\tfrom app.rb:10:in `calc'\n\tfrom app.rb:14:in `<main>'";

    #[test]
    fn test_high_confidence_on_typed_head_line() {
        assert_eq!(RubyParser.can_parse(SAMPLE), Confidence::High);
    }

    #[test]
    fn test_medium_on_from_lines_only() {
        assert_eq!(
            RubyParser.can_parse("\tfrom lib/x.rb:3:in `run'"),
            Confidence::Medium
        );
    }

    #[test]
    fn test_parse_head_line() {
        let result = RubyParser.parse(SAMPLE);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "ZeroDivisionError");
        assert_eq!(exc.message, "divided by 0");

        assert_eq!(result.frames.len(), 3);
        let head = &result.frames[0];
        assert_eq!(head.file_path.as_deref(), Some(std::path::Path::new("app.rb")));
        assert_eq!(head.line, Some(5));
        assert_eq!(head.function_name.as_deref(), Some("divide"));
    }

    #[test]
    fn test_from_frames_keep_order() {
        let result = RubyParser.parse(SAMPLE);
        assert_eq!(result.frames[1].line, Some(10));
        assert_eq!(result.frames[1].function_name.as_deref(), Some("calc"));
        assert_eq!(result.frames[2].function_name.as_deref(), Some("<main>"));
    }

    #[test]
    fn test_gem_paths_are_library_code() {
        let stderr = "x.rb:1:in `go': bad (RuntimeError)\n\tfrom /usr/lib/ruby/gems/3.2.0/gems/rack-3.0/lib/rack.rb:44:in `call'";
        let result = RubyParser.parse(stderr);
        assert!(result.frames[0].is_user_code);
        assert!(!result.frames[1].is_user_code);
    }

    #[test]
    fn test_block_frame_reports_enclosing_method() {
        assert_eq!(RubyParser::clean_func("block in main"), "main");
        assert_eq!(RubyParser::clean_func("block (2 levels) in run"), "run");
        assert_eq!(RubyParser::clean_func("divide"), "divide");
    }

    #[test]
    fn test_unrelated_text_fails() {
        assert!(!RubyParser.parse("plain output").success);
    }
}
