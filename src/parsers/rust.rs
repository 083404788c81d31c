//! Rust panic output parser. Handles both the pre-1.65 single-line panic
//! header and the current two-line form, plus `RUST_BACKTRACE` frames.

use super::{Confidence, ErrorParser, ExceptionInfo, ParseResult, StackFrame};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// Old: thread 'main' panicked at 'attempt to divide by zero', src/main.rs:5:10
static OLD_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^thread '(?P<thread>[^']*)' panicked at '(?P<msg>.*)', (?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+)\s*$",
    )
    .unwrap()
});

// New: thread 'main' panicked at src/main.rs:5:10:
//      attempt to divide by zero
static NEW_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^thread '(?P<thread>[^']*)' panicked at (?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+):\s*$",
    )
    .unwrap()
});

// Backtrace: `   4: mycrate::module::func` / `             at ./src/lib.rs:10:5`
static BT_FUNC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:\s+(?:0x[0-9a-f]+ - )?(?P<func>.+?)\s*$").unwrap());

static BT_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+at (?P<file>[^:]+):(?P<line>\d+)(?::(?P<col>\d+))?\s*$").unwrap()
});

static HASH_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}$").unwrap());

const LIBRARY_PATH_MARKERS: [&str; 3] = ["/rustc/", "/.cargo/", "/toolchains/"];
const LIBRARY_FUNC_PREFIXES: [&str; 4] = ["std::", "core::", "alloc::", "__rust"];

pub struct RustParser;

impl RustParser {
    fn is_library_frame(func: &str, file: &str) -> bool {
        LIBRARY_PATH_MARKERS.iter().any(|m| file.contains(m))
            || LIBRARY_FUNC_PREFIXES.iter().any(|p| func.starts_with(p))
    }

    /// Drop the monomorphization hash and keep the final path segment:
    /// `app::math::divide::h1f0a...` becomes `divide`.
    fn simple_name(raw: &str) -> String {
        let no_hash = HASH_SUFFIX_RE.replace(raw, "");
        match no_hash.rfind("::") {
            Some(idx) => no_hash[idx + 2..].to_string(),
            None => no_hash.into_owned(),
        }
    }
}

impl ErrorParser for RustParser {
    fn language(&self) -> &'static str {
        "Rust"
    }

    fn can_parse(&self, stderr: &str) -> Confidence {
        if stderr.contains("panicked at") && stderr.contains("thread '") {
            return Confidence::High;
        }
        if stderr.contains("RUST_BACKTRACE") || stderr.lines().any(|l| BT_AT_RE.is_match(l)) {
            return Confidence::Medium;
        }
        if stderr.contains(".rs:") {
            return Confidence::Low;
        }
        Confidence::None
    }

    fn parse(&self, stderr: &str) -> ParseResult {
        let mut exception: Option<ExceptionInfo> = None;
        let mut frames: Vec<StackFrame> = Vec::new();
        let mut pending_func: Option<String> = None;
        let mut expect_new_form_message = false;

        for line in stderr.lines() {
            if expect_new_form_message {
                expect_new_form_message = false;
                if let Some(exc) = exception.as_mut() {
                    if exc.message.is_empty() {
                        exc.message = line.trim().to_string();
                    }
                }
                continue;
            }
            if let Some(caps) = OLD_HEADER_RE.captures(line) {
                if exception.is_none() {
                    exception = Some(ExceptionInfo::new(
                        "panic",
                        caps.name("msg").map(|m| m.as_str()).unwrap_or_default(),
                    ));
                    frames.push(Self::header_frame(&caps));
                }
                continue;
            }
            if let Some(caps) = NEW_HEADER_RE.captures(line) {
                if exception.is_none() {
                    exception = Some(ExceptionInfo::new("panic", ""));
                    frames.push(Self::header_frame(&caps));
                    expect_new_form_message = true;
                }
                continue;
            }
            if let Some(caps) = BT_AT_RE.captures(line) {
                let file = caps.name("file").map(|m| m.as_str().trim()).unwrap_or_default();
                if let Some(raw_func) = pending_func.take() {
                    frames.push(StackFrame {
                        file_path: Some(PathBuf::from(file)),
                        line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                        column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
                        function_name: Some(Self::simple_name(&raw_func)),
                        class_name: None,
                        is_user_code: !Self::is_library_frame(&raw_func, file),
                        snippet: None,
                    });
                }
                continue;
            }
            if let Some(caps) = BT_FUNC_RE.captures(line) {
                pending_func = caps.name("func").map(|m| m.as_str().to_string());
            }
        }

        ParseResult::from_parts(exception, frames, stderr)
    }
}

impl RustParser {
    fn header_frame(caps: &regex::Captures<'_>) -> StackFrame {
        let file = caps.name("file").map(|m| m.as_str()).unwrap_or_default();
        StackFrame {
            file_path: Some(PathBuf::from(file)),
            line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
            column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
            function_name: None,
            class_name: None,
            is_user_code: !Self::is_library_frame("", file),
            snippet: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_FORM: &str = "thread 'main' panicked at src/main.rs:5:19:\nattempt to divide by zero\nnote: run with `RUST_BACKTRACE=1` environment variable to display a backtrace";

    const OLD_FORM: &str =
        "thread 'main' panicked at 'index out of bounds', src/lib.rs:42:9\nnote: run with `RUST_BACKTRACE=1`";

    #[test]
    fn test_high_confidence_on_panic_header() {
        assert_eq!(RustParser.can_parse(NEW_FORM), Confidence::High);
        assert_eq!(RustParser.can_parse(OLD_FORM), Confidence::High);
    }

    #[test]
    fn test_new_form_message_on_following_line() {
        let result = RustParser.parse(NEW_FORM);
        let exc = result.exception.unwrap();
        assert_eq!(exc.exception_type, "panic");
        assert_eq!(exc.message, "attempt to divide by zero");
    }

    #[test]
    fn test_old_form_inline_message() {
        let result = RustParser.parse(OLD_FORM);
        let exc = result.exception.unwrap();
        assert_eq!(exc.message, "index out of bounds");
    }

    #[test]
    fn test_header_location_becomes_first_frame() {
        let result = RustParser.parse(NEW_FORM);
        assert_eq!(result.frames.len(), 1);
        let frame = &result.frames[0];
        assert_eq!(
            frame.file_path.as_deref(),
            Some(std::path::Path::new("src/main.rs"))
        );
        assert_eq!(frame.line, Some(5));
        assert_eq!(frame.column, Some(19));
        assert!(frame.is_user_code);
    }

    #[test]
    fn test_backtrace_frames() {
        let stderr = "thread 'main' panicked at src/main.rs:9:5:\nboom\nstack backtrace:\n   0: std::panicking::begin_panic_handler\n             at /rustc/abc123/library/std/src/panicking.rs:652:5\n   1: app::math::divide::h1f0a2b3c4d5e6f70\n             at ./src/math.rs:14:9\n   2: app::main\n             at ./src/main.rs:9:5";
        let result = RustParser.parse(stderr);
        // Header frame + three backtrace frames.
        assert_eq!(result.frames.len(), 4);

        let std_frame = &result.frames[1];
        assert!(!std_frame.is_user_code);
        assert_eq!(
            std_frame.function_name.as_deref(),
            Some("begin_panic_handler")
        );

        let user_frame = &result.frames[2];
        assert!(user_frame.is_user_code);
        assert_eq!(user_frame.function_name.as_deref(), Some("divide"));
        assert_eq!(user_frame.line, Some(14));
    }

    #[test]
    fn test_hash_suffix_stripped() {
        assert_eq!(
            RustParser::simple_name("app::math::divide::h1f0a2b3c4d5e6f70"),
            "divide"
        );
        assert_eq!(RustParser::simple_name("main"), "main");
    }

    #[test]
    fn test_unrelated_text_fails() {
        assert!(!RustParser.parse("nothing rusty").success);
    }
}
