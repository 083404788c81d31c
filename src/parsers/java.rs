//! JVM stack trace parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// `at com.example.Main.divide(Main.java:10)`, plus the Native Method and
// Unknown Source variants. The callable may carry a module prefix like
// `java.base/`.
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*at\s+(?P<callable>[\w.$<>/]+)\((?:(?P<file>[\w$]+\.java):(?P<line>\d+)|Native Method|Unknown Source)\)\s*$",
    )
    .unwrap()
});

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:Exception in thread "[^"]*"\s+)?(?P<type>[\w.$]+(?:Exception|Error|Throwable)):\s?(?P<msg>.*)$"#,
    )
    .unwrap()
});

static CAUSED_BY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Caused by:\s+(?P<inner>.+)$").unwrap());

const LIBRARY_PREFIXES: [&str; 6] = ["java.", "javax.", "jdk.", "sun.", "com.sun.", "kotlin."];

pub struct JavaParser;

impl JavaParser {
    fn is_library_callable(callable: &str) -> bool {
        LIBRARY_PREFIXES.iter().any(|p| callable.starts_with(p))
    }

    /// `com.example.Main.divide` yields class `com.example.Main` and function
    /// `divide`. Constructors appear as `<init>`.
    fn split_callable(callable: &str) -> (Option<String>, Option<String>) {
        match callable.rfind('.') {
            Some(idx) if idx > 0 => (
                Some(callable[idx + 1..].to_string()),
                Some(callable[..idx].to_string()),
            ),
            _ => (Some(callable.to_string()), None),
        }
    }
}

impl ErrorParser for JavaParser {
    fn language(&self) -> &'static str {
        "Java"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        if stderr.lines().any(|l| FRAME_RE.is_match(l)) {
            return Confidence::High;
        }
        if stderr.contains("Exception in thread")
            || stderr.lines().any(|l| HEADER_RE.is_match(l.trim_end()))
        {
            return Confidence::Medium;
        }
        if stderr.contains(".java:") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception: Option<ExceptionInfo> = None;
        let mut frames = Vec::new();
        let mut in_cause_section = false;

        for line in stderr.lines() {
            if let Some(caps) = CAUSED_BY_RE.captures(line.trim_end()) {
                in_cause_section = true;
                if let Some(exc) = exception.take() {
                    exception = Some(exc.with_cause(
                        caps.name("inner").map(|m| m.as_str()).unwrap_or_default(),
                    ));
                }
                continue;
            }
            if let Some(caps) = FRAME_RE.captures(line) {
                // Frames under `Caused by:` restate the outer trace; the
                // primary trace is the one above it.
                if in_cause_section {
                    continue;
                }
                let callable = caps.name("callable").map(|m| m.as_str()).unwrap_or_default();
                let (function_name, class_name) = Self::split_callable(callable);
                frames.push(StackFrame {
                    file_path: caps.name("file").map(|m| PathBuf::from(m.as_str())),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: None,
                    function_name,
                    class_name,
                    is_user_code: !Self::is_library_callable(callable),
                    snippet: None,
                });
                continue;
            }
            if exception.is_none() {
                if let Some(caps) = HEADER_RE.captures(line.trim_end()) {
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

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Exception in thread \"main\" java.lang.ArithmeticException: / by zero\n\tat com.example.Calculator.divide(Calculator.java:10)\n\tat com.example.Main.main(Main.java:5)\n\tat java.base/java.lang.Thread.run(Thread.java:833)";

    #[test]
    fn test_high_confidence_on_frame() {
        assert_eq!(JavaParser.can_parse(SAMPLE), Confidence::High);
    }

    #[test]
    fn test_parse_header_and_frames() {
        let result = JavaParser.parse(SAMPLE);
        assert!(result.success);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "java.lang.ArithmeticException");
        assert_eq!(exc.message, "/ by zero");

        let first = &result.frames[0];
        assert_eq!(first.function_name.as_deref(), Some("divide"));
        assert_eq!(first.class_name.as_deref(), Some("com.example.Calculator"));
        assert_eq!(
            first.file_path.as_deref(),
            Some(std::path::Path::new("Calculator.java"))
        );
        assert_eq!(first.line, Some(10));
        assert!(first.is_user_code);
    }

    #[test]
    fn test_jdk_frames_are_library_code() {
        let stderr = "java.lang.RuntimeException: boom\n\tat java.util.ArrayList.get(ArrayList.java:427)\n\tat com.app.Service.load(Service.java:22)";
        let result = JavaParser.parse(stderr);
        assert!(!result.frames[0].is_user_code);
        assert!(result.frames[1].is_user_code);
    }

    #[test]
    fn test_caused_by_recorded_not_reframed() {
        let stderr = "java.lang.IllegalStateException: wrapper\n\tat com.app.Main.run(Main.java:9)\nCaused by: java.io.IOException: disk gone\n\tat com.app.Disk.read(Disk.java:3)";
        let result = JavaParser.parse(stderr);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "java.lang.IllegalStateException");
        assert_eq!(exc.cause.as_deref(), Some("java.io.IOException: disk gone"));
        // Only the primary trace contributes frames.
        assert_eq!(result.frames.len(), 1);
    }

    #[test]
    fn test_native_method_frame_has_no_location() {
        let stderr = "java.lang.RuntimeException: x\n\tat sun.misc.Unsafe.park(Native Method)";
        let result = JavaParser.parse(stderr);
        assert_eq!(result.frames.len(), 1);
        assert!(result.frames[0].file_path.is_none());
        assert!(!result.frames[0].is_user_code);
    }

    #[test]
    fn test_unrelated_text_fails() {
        assert!(!JavaParser.parse("hello world").success);
    }
}
