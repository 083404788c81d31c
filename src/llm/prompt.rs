//! Builds the bounded JSON payload describing one crash.
//!
//! Every field is capped, so the payload stays small no matter how much the
//! child process wrote to stderr.

use crate::context::ErrorContext;
use serde::Serialize;

const MAX_MESSAGE_CHARS: usize = 500;
const MAX_FRAMES: usize = 20;
const MAX_COMMAND_CHARS: usize = 200;
const MAX_SOURCE_LINES: usize = 50;
const MAX_SOURCE_CHARS: usize = 10_000;

#[derive(Serialize)]
struct UserPayload<'a> {
    language: &'a str,
    error: ErrorPayload,
    stack_trace: Vec<FramePayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_context: Option<SourcePayload>,
    original_command: String,
    working_directory: String,
}

#[derive(Serialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Serialize)]
struct FramePayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    class_name: Option<&'a str>,
    is_user_code: bool,
}

#[derive(Serialize)]
struct SourcePayload {
    file_path: String,
    error_line: u32,
    raw_code: String,
    is_truncated: bool,
}

/// Render the per-request user payload as compact JSON.
pub fn build_user_payload(context: &ErrorContext) -> String {
    let error = match &context.exception {
        Some(exc) => ErrorPayload {
            error_type: exc.exception_type.clone(),
            message: truncate_with_marker(&exc.message, MAX_MESSAGE_CHARS),
        },
        None => ErrorPayload {
            error_type: "Error".to_string(),
            message: String::new(),
        },
    };

    let stack_trace: Vec<FramePayload> = context
        .frames
        .iter()
        .take(MAX_FRAMES)
        .map(|frame| FramePayload {
            file_path: frame
                .file_path
                .as_ref()
                .map(|p| p.display().to_string()),
            line: frame.line,
            function_name: frame.function_name.as_deref(),
            class_name: frame.class_name.as_deref(),
            is_user_code: frame.is_user_code,
        })
        .collect();

    let source_context = context.primary_frame().and_then(|frame| {
        let snippet = frame.snippet.as_ref()?;
        let (raw_code, is_truncated) = bounded_raw_code(snippet);
        Some(SourcePayload {
            file_path: snippet.file_path.display().to_string(),
            error_line: snippet.error_line,
            raw_code,
            is_truncated,
        })
    });

    let payload = UserPayload {
        language: &context.language,
        error,
        stack_trace,
        source_context,
        original_command: truncate_with_marker(&context.original_command, MAX_COMMAND_CHARS),
        working_directory: context.working_directory.display().to_string(),
    };

    // Serialization of these plain structs cannot fail.
    serde_json::to_string(&payload).unwrap_or_default()
}

/// Raw snippet lines joined by `\n`, stopping at the first of 50 lines or
/// 10,000 characters. No line numbers, no gutters, no error markers.
fn bounded_raw_code(snippet: &crate::snippet::SourceSnippet) -> (String, bool) {
    let mut out = String::new();
    let mut chars = 0;
    let mut truncated = snippet.lines.len() > MAX_SOURCE_LINES;
    for (i, line) in snippet.lines.iter().take(MAX_SOURCE_LINES).enumerate() {
        let line_chars = line.content.chars().count() + usize::from(i > 0);
        if chars + line_chars > MAX_SOURCE_CHARS {
            truncated = true;
            break;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&line.content);
        chars += line_chars;
    }
    (out, truncated)
}

fn truncate_with_marker(s: &str, max_chars: usize) -> String {
    crate::context::truncate_chars(s, max_chars)
}
