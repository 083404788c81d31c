//! Language-specific error parsers and their registry.
//!
//! Each parser is a sibling behind [`ErrorParser`]: a cheap confidence
//! scan plus a best-effort structured extraction. The registry picks the
//! highest-confidence parser, breaking ties by registration order.

mod csharp;
mod go;
mod java;
mod node;
mod php;
mod python;
mod ruby;
mod rust;
mod swift;

pub use csharp::CSharpParser;
pub use go::GoParser;
pub use java::JavaParser;
pub use node::NodeParser;
pub use php::PhpParser;
pub use python::PythonParser;
pub use ruby::RubyParser;
pub use rust::RustParser;
pub use swift::SwiftParser;

use crate::snippet::SourceSnippet;
use std::path::PathBuf;

/// How sure a parser is that a blob of stderr belongs to its language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

/// One entry in a parsed stack trace. Valid when at least one of
/// (file + line) or (function/class) is known.
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    pub file_path: Option<PathBuf>,
    /// 1-based.
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub is_user_code: bool,
    pub snippet: Option<SourceSnippet>,
}

impl StackFrame {
    pub fn is_valid(&self) -> bool {
        (self.file_path.is_some() && self.line.is_some())
            || self.function_name.is_some()
            || self.class_name.is_some()
    }
}

/// The exception (or panic) a trace reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub message: String,
    /// Nested inner cause, when the trace chains one.
    pub cause: Option<String>,
}

impl ExceptionInfo {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Outcome of one parse attempt. When `success` is set, at least one of
/// `exception` / `frames` is populated.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub success: bool,
    pub exception: Option<ExceptionInfo>,
    pub frames: Vec<StackFrame>,
    pub raw_error: Option<String>,
}

impl ParseResult {
    /// Build from extracted parts; success follows from having any of them.
    pub fn from_parts(
        exception: Option<ExceptionInfo>,
        frames: Vec<StackFrame>,
        stderr: &str,
    ) -> Self {
        if exception.is_none() && frames.is_empty() {
            return Self::failure(stderr);
        }
        Self {
            success: true,
            exception,
            frames,
            raw_error: None,
        }
    }

    pub fn failure(stderr: &str) -> Self {
        Self {
            success: false,
            exception: None,
            frames: Vec::new(),
            raw_error: Some(stderr.to_string()),
        }
    }
}

/// A language-specific stderr parser. Implementations never panic on
/// malformed input; anything unparseable degrades to a failed result.
pub trait ErrorParser: Send + Sync {
    fn language(&self) -> &'static str;

    /// Cheap scan for the language's anchors.
    fn can_parse(&self, stderr: &str) -> Confidence;

    /// Best-effort structured extraction.
    fn parse(&self, stderr: &str) -> ParseResult;
}

/// Ordered collection of parsers. Earlier registration wins ties, so the
/// default order below is part of the observable behavior.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn ErrorParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// All nine built-in parsers in their canonical order.
    pub fn with_default_parsers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PythonParser));
        registry.register(Box::new(NodeParser));
        registry.register(Box::new(CSharpParser));
        registry.register(Box::new(JavaParser));
        registry.register(Box::new(GoParser));
        registry.register(Box::new(RustParser));
        registry.register(Box::new(RubyParser));
        registry.register(Box::new(PhpParser));
        registry.register(Box::new(SwiftParser));
        registry
    }

    pub fn register(&mut self, parser: Box<dyn ErrorParser>) {
        self.parsers.push(parser);
    }

    /// The parser reporting the highest confidence for `stderr`, or `None`
    /// when every parser reports [`Confidence::None`].
    pub fn best(&self, stderr: &str) -> Option<&dyn ErrorParser> {
        let mut best: Option<(&dyn ErrorParser, Confidence)> = None;
        for parser in &self.parsers {
            let confidence = parser.can_parse(stderr);
            if confidence == Confidence::None {
                continue;
            }
            match best {
                Some((_, seen)) if seen >= confidence => {}
                _ => best = Some((parser.as_ref(), confidence)),
            }
        }
        best.map(|(parser, _)| parser)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

/// Strip a parameter list and keep the last segment of a dotted name:
/// `Namespace.Class.Method(int a)` becomes `Method`.
pub(crate) fn simple_function_name(raw: &str) -> String {
    let no_params = match raw.find('(') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    let trimmed = no_params.trim();
    match trimmed.rfind('.') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedParser {
        name: &'static str,
        confidence: Confidence,
    }

    impl ErrorParser for FixedParser {
        fn language(&self) -> &'static str {
            self.name
        }
        fn can_parse(&self, _stderr: &str) -> Confidence {
            self.confidence
        }
        fn parse(&self, stderr: &str) -> ParseResult {
            ParseResult::failure(stderr)
        }
    }

    #[test]
    fn test_registry_picks_highest_confidence() {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(FixedParser {
            name: "low",
            confidence: Confidence::Low,
        }));
        registry.register(Box::new(FixedParser {
            name: "high",
            confidence: Confidence::High,
        }));
        assert_eq!(registry.best("x").unwrap().language(), "high");
    }

    #[test]
    fn test_registry_tie_breaks_by_registration_order() {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(FixedParser {
            name: "first",
            confidence: Confidence::Medium,
        }));
        registry.register(Box::new(FixedParser {
            name: "second",
            confidence: Confidence::Medium,
        }));
        assert_eq!(registry.best("x").unwrap().language(), "first");
    }

    #[test]
    fn test_registry_none_when_no_parser_matches() {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(FixedParser {
            name: "none",
            confidence: Confidence::None,
        }));
        assert!(registry.best("x").is_none());
    }

    #[test]
    fn test_frame_validity() {
        let mut frame = StackFrame::default();
        assert!(!frame.is_valid());
        frame.function_name = Some("main".to_string());
        assert!(frame.is_valid());

        let located = StackFrame {
            file_path: Some(PathBuf::from("a.py")),
            line: Some(3),
            ..Default::default()
        };
        assert!(located.is_valid());

        let file_only = StackFrame {
            file_path: Some(PathBuf::from("a.py")),
            ..Default::default()
        };
        assert!(!file_only.is_valid());
    }

    #[test]
    fn test_simple_function_name() {
        assert_eq!(simple_function_name("Ns.Class.Method(int a)"), "Method");
        assert_eq!(simple_function_name("divide"), "divide");
        assert_eq!(simple_function_name("Object.foo"), "foo");
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert!(Confidence::Low > Confidence::None);
    }
}
