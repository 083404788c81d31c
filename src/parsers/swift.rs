//! Swift runtime failure parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// Two shapes:
//   Fatal error: Division by zero: file MyApp/main.swift, line 5
//   MyApp/main.swift:5: Fatal error: Division by zero
static OLD_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<kind>Fatal error|Precondition failed|Assertion failed)(?::\s+(?P<msg>.*?))?:\s+file\s+(?P<file>\S+\.swift),\s+line\s+(?P<line>\d+)\s*$",
    )
    .unwrap()
});

static NEW_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>\S+\.swift):(?P<line>\d+):\s+(?P<kind>Fatal error|Precondition failed|Assertion failed)(?::\s+(?P<msg>.*))?\s*$",
    )
    .unwrap()
});

const LIBRARY_MARKERS: [&str; 3] = ["libswift", "/usr/lib/swift", "/Xcode.app/"];

pub struct SwiftParser;

impl SwiftParser {
    fn kind_to_type(kind: &str) -> &'static str {
        match kind {
            "Precondition failed" => "PreconditionFailure",
            "Assertion failed" => "AssertionFailure",
            _ => "FatalError",
        }
    }

    fn is_library_path(path: &str) -> bool {
        LIBRARY_MARKERS.iter().any(|m| path.contains(m))
    }
}

impl ErrorParser for SwiftParser {
    fn language(&self) -> &'static str {
        "Swift"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        let matched = stderr
            .lines()
            .any(|l| OLD_FORM_RE.is_match(l.trim_end()) || NEW_FORM_RE.is_match(l.trim_end()));
        if matched {
            return Confidence::High;
        }
        if stderr.contains("Fatal error:") && stderr.contains(".swift") {
            return Confidence::Medium;
        }
        if stderr.contains(".swift") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception = None;
        let mut frames = Vec::new();

        for line in stderr.lines() {
            let trimmed = line.trim_end();
            let caps = OLD_FORM_RE
                .captures(trimmed)
                .or_else(|| NEW_FORM_RE.captures(trimmed));
            let Some(caps) = caps else { continue };
            if exception.is_some() {
                continue;
            }
            let kind = caps.name("kind").map(|m| m.as_str()).unwrap_or_default();
            exception = Some(ExceptionInfo::new(
                Self::kind_to_type(kind),
                caps.name("msg").map(|m| m.as_str()).unwrap_or_default(),
            ));
            let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
            // The failure line is the only location Swift reports without a
            // symbolicated crash log, so it becomes the first frame.
            frames.push(StackFrame {
                is_user_code: !Self::is_library_path(file),
                file_path: Some(PathBuf::from(file)),
                line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                column: None,
                function_name: None,
                class_name: None,
                snippet: None,
            });
        }

        ParseResult::from_parts(exception, frames, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD_FORM: &str =
        "Fatal error: Division by zero: file MyApp/main.swift, line 5";
    const NEW_FORM: &str = "MyApp/main.swift:5: Fatal error: Division by zero";

    #[test]
    fn test_high_confidence_on_both_forms() {
        assert_eq!(SwiftParser.can_parse(OLD_FORM), Confidence::High);
        assert_eq!(SwiftParser.can_parse(NEW_FORM), Confidence::High);
    }

    #[test]
    fn test_old_form_parse() {
        let result = SwiftParser.parse(OLD_FORM);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "FatalError");
        assert_eq!(exc.message, "Division by zero");
        assert_eq!(result.frames.len(), 1);
        assert_eq!(
            result.frames[0].file_path.as_deref(),
            Some(std::path::Path::new("MyApp/main.swift"))
        );
        assert_eq!(result.frames[0].line, Some(5));
    }

    #[test]
    fn test_new_form_parse() {
        let result = SwiftParser.parse(NEW_FORM);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "FatalError");
        assert_eq!(result.frames[0].line, Some(5));
    }

    #[test]
    fn test_precondition_and_assertion_kinds() {
        let pre = SwiftParser.parse("main.swift:9: Precondition failed: index in range");
        assert_eq!(pre.exception.unwrap().exception_type, "PreconditionFailure");

        let assert_failure = SwiftParser.parse("main.swift:3: Assertion failed");
        assert_eq!(
            assert_failure.exception.unwrap().exception_type,
            "AssertionFailure"
        );
    }

    #[test]
    fn test_fatal_error_without_message() {
        let result = SwiftParser.parse("main.swift:2: Fatal error");
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "FatalError");
        assert_eq!(exc.message, "");
    }

    #[test]
    fn test_unrelated_text_fails() {
        assert!(!SwiftParser.parse("just logs").success);
    }
}
