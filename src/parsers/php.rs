//! PHP fatal error / uncaught exception parser.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// PHP Fatal error:  Uncaught DivisionByZeroError: Division by zero in /app/index.php:5
// Fatal error: Allowed memory size exhausted in /app/big.php on line 12
static FATAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:PHP )?Fatal error:\s+(?:Uncaught (?P<type>[\w\\]+):\s+)?(?P<msg>.*?)\s+in\s+(?P<file>\S+?)(?::(?P<line>\d+)|\s+on line\s+(?P<line2>\d+))\s*$",
    )
    .unwrap()
});

// #0 /app/index.php(10): divide(1, 0)
static TRACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\d+\s+(?P<file>\S+?)\((?P<line>\d+)\):\s+(?P<call>.+)$").unwrap()
});

static MAIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\d+\s+\{main\}\s*$").unwrap());

const LIBRARY_MARKERS: [&str; 2] = ["/vendor/", "phar://"];

pub struct PhpParser;

impl PhpParser {
    fn is_library_path(path: &str) -> bool {
        LIBRARY_MARKERS.iter().any(|m| path.contains(m))
    }

    /// `Foo->bar(1, 2)` / `Foo::bar()` split into class and method; a bare
    /// `divide(1, 0)` is just a function.
    fn split_call(raw: &str) -> (Option<String>, Option<String>) {
        let name = match raw.find('(') {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        if let Some(idx) = name.find("->").or_else(|| name.find("::")) {
            let class = &name[..idx];
            let func = &name[idx + 2..];
            (Some(func.to_string()), Some(class.to_string()))
        } else {
            (Some(name.to_string()), None)
        }
    }
}

impl ErrorParser for PhpParser {
    fn language(&self) -> &'static str {
        "PHP"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        let has_fatal = stderr.lines().any(|l| FATAL_RE.is_match(l.trim_end()));
        let has_trace = stderr.lines().any(|l| TRACE_RE.is_match(l.trim_end()));
        if has_fatal || has_trace {
            return Confidence::High;
        }
        if stderr.contains("Stack trace:") {
            return Confidence::Medium;
        }
        if stderr.contains(".php") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception = None;
        let mut frames = Vec::new();
        let mut error_location: Option<(String, Option<u32>)> = None;

        for line in stderr.lines() {
            let trimmed = line.trim_end();
            if MAIN_RE.is_match(trimmed) {
                continue;
            }
            if let Some(caps) = TRACE_RE.captures(trimmed) {
                let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                let (function_name, class_name) = caps
                    .name("call")
                    .map(|m| Self::split_call(m.as_str()))
                    .unwrap_or((None, None));
                frames.push(StackFrame {
                    file_path: Some(PathBuf::from(file)),
                    line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    column: None,
                    function_name,
                    class_name,
                    is_user_code: !Self::is_library_path(file),
                    snippet: None,
                });
                continue;
            }
            if exception.is_none() {
                if let Some(caps) = FATAL_RE.captures(trimmed) {
                    let exception_type = caps
                        .name("type")
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| "Fatal error".to_string());
                    exception = Some(ExceptionInfo::new(
                        exception_type,
                        caps.name("msg").map(|m| m.as_str()).unwrap_or_default(),
                    ));
                    let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
                    let line_no = caps
                        .name("line")
                        .or_else(|| caps.name("line2"))
                        .and_then(|m| m.as_str().parse().ok());
                    error_location = Some((file.to_string(), line_no));
                }
            }
        }

        // No trace frames: the error location itself is the only frame.
        if frames.is_empty() {
            if let Some((file, line)) = error_location {
                frames.push(StackFrame {
                    is_user_code: !Self::is_library_path(&file),
                    file_path: Some(PathBuf::from(file)),
                    line,
                    column: None,
                    function_name: None,
                    class_name: None,
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

    const SAMPLE: &str = "PHP Fatal error:  Uncaught DivisionByZeroError: Division by zero in /app/index.php:5\nStack trace:\n#0 /app/index.php(10): divide(1, 0)\n#1 {main}\n  thrown in /app/index.php on line 5";

    #[test]
    fn test_high_confidence_on_fatal_error() {
        assert_eq!(PhpParser.can_parse(SAMPLE), Confidence::High);
    }

    #[test]
    fn test_parse_uncaught_exception() {
        let result = PhpParser.parse(SAMPLE);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "DivisionByZeroError");
        assert_eq!(exc.message, "Division by zero");
    }

    #[test]
    fn test_trace_frames_parsed_and_main_skipped() {
        let result = PhpParser.parse(SAMPLE);
        assert_eq!(result.frames.len(), 1);
        let frame = &result.frames[0];
        assert_eq!(
            frame.file_path.as_deref(),
            Some(std::path::Path::new("/app/index.php"))
        );
        assert_eq!(frame.line, Some(10));
        assert_eq!(frame.function_name.as_deref(), Some("divide"));
    }

    #[test]
    fn test_plain_fatal_error_synthesizes_location_frame() {
        let stderr =
            "Fatal error: Allowed memory size of 134217728 bytes exhausted in /app/big.php on line 12";
        let result = PhpParser.parse(stderr);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "Fatal error");
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].line, Some(12));
        assert_eq!(
            result.frames[0].file_path.as_deref(),
            Some(std::path::Path::new("/app/big.php"))
        );
    }

    #[test]
    fn test_method_call_splits_class() {
        let stderr = "PHP Fatal error:  Uncaught RuntimeException: nope in /app/a.php:3\nStack trace:\n#0 /app/b.php(7): Service->handle()\n#1 /app/c.php(9): Router::dispatch()\n#2 {main}";
        let result = PhpParser.parse(stderr);
        assert_eq!(result.frames[0].function_name.as_deref(), Some("handle"));
        assert_eq!(result.frames[0].class_name.as_deref(), Some("Service"));
        assert_eq!(result.frames[1].function_name.as_deref(), Some("dispatch"));
        assert_eq!(result.frames[1].class_name.as_deref(), Some("Router"));
    }

    #[test]
    fn test_vendor_paths_are_library_code() {
        let stderr = "PHP Fatal error:  Uncaught Error: x in /app/a.php:3\nStack trace:\n#0 /app/vendor/laravel/framework/src/Kernel.php(12): handle()";
        let result = PhpParser.parse(stderr);
        assert!(!result.frames[0].is_user_code);
    }

    #[test]
    fn test_unrelated_text_fails() {
        assert!(!PhpParser.parse("all fine").success);
    }
}
