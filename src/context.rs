//! Turns a raw crash report into an enriched, structured error context.

use crate::parsers::{ExceptionInfo, ParserRegistry, StackFrame};
use crate::report::CrashReport;
use crate::snippet;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Lines of context either side of the error line when enriching frames.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 10;

/// Language reported when no parser claims the output.
const UNKNOWN_LANGUAGE: &str = "Unknown";

/// Fallback messages keep at most this many characters of stderr.
const FALLBACK_MESSAGE_CHARS: usize = 200;

/// Everything the prompt needs about one failure.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub language: String,
    pub exception: Option<ExceptionInfo>,
    pub frames: Vec<StackFrame>,
    /// Index into `frames` of the frame worth showing source for.
    pub primary_frame: Option<usize>,
    pub original_command: String,
    pub working_directory: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn primary_frame(&self) -> Option<&StackFrame> {
        self.primary_frame.and_then(|idx| self.frames.get(idx))
    }
}

/// Orchestrates parser selection, parsing, and snippet enrichment.
pub struct ContextEngine {
    registry: ParserRegistry,
    window: u32,
}

impl ContextEngine {
    pub fn new() -> Self {
        Self {
            registry: ParserRegistry::with_default_parsers(),
            window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    pub fn with_registry(registry: ParserRegistry) -> Self {
        Self {
            registry,
            window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Build an [`ErrorContext`] for a failed run. Returns `None` only when
    /// stderr is empty; an unrecognized error still produces a fallback
    /// context so the pipeline can continue.
    pub fn process(&self, report: &CrashReport) -> Option<ErrorContext> {
        let stderr = report.stderr();
        if stderr.trim().is_empty() {
            return None;
        }

        let started = Instant::now();

        let parsed = self.registry.best(stderr).and_then(|parser| {
            let result = parser.parse(stderr);
            if result.success {
                Some((parser.language().to_string(), result))
            } else {
                None
            }
        });

        let context = match parsed {
            Some((language, result)) => {
                let mut frames = result.frames;
                for frame in &mut frames {
                    self.enrich_frame(frame, report.working_directory());
                }
                let primary = pick_primary_frame(&frames);
                ErrorContext {
                    language,
                    exception: result.exception,
                    frames,
                    primary_frame: primary,
                    original_command: report.command().to_string(),
                    working_directory: report.working_directory().to_path_buf(),
                    timestamp: report.timestamp(),
                }
            }
            None => self.fallback_context(report),
        };

        debug!(
            language = %context.language,
            frames = context.frames.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "parsed crash output"
        );

        Some(context)
    }

    fn enrich_frame(&self, frame: &mut StackFrame, working_directory: &Path) {
        let (Some(path), Some(line)) = (frame.file_path.as_ref(), frame.line) else {
            return;
        };
        let resolved = if path.is_absolute() {
            path.clone()
        } else {
            let joined = working_directory.join(path);
            if joined.exists() {
                joined
            } else {
                path.clone()
            }
        };
        frame.snippet = snippet::read_context(&resolved, line, self.window);
    }

    /// A context for output no parser understands. Never `None`: the LLM can
    /// sometimes act on raw text alone.
    fn fallback_context(&self, report: &CrashReport) -> ErrorContext {
        let message = truncate_chars(report.stderr().trim(), FALLBACK_MESSAGE_CHARS);
        ErrorContext {
            language: UNKNOWN_LANGUAGE.to_string(),
            exception: Some(ExceptionInfo::new("Error", message)),
            frames: Vec::new(),
            primary_frame: None,
            original_command: report.command().to_string(),
            working_directory: report.working_directory().to_path_buf(),
            timestamp: report.timestamp(),
        }
    }
}

impl Default for ContextEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First user-code frame with a non-empty path; otherwise the first frame.
fn pick_primary_frame(frames: &[StackFrame]) -> Option<usize> {
    frames
        .iter()
        .position(|f| {
            f.is_user_code
                && f.file_path
                    .as_ref()
                    .map_or(false, |p| !p.as_os_str().is_empty())
        })
        .or(if frames.is_empty() { None } else { Some(0) })
}

/// Unicode-safe prefix with a `...` marker when anything was cut.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}
