//! Extracts and validates a structured fix from free-form LLM output.
//!
//! Models decorate their JSON with prose and markdown fences; the extractor
//! tolerates both. Two response schemas are accepted: the current `edits[]`
//! shape and a legacy single-edit shape kept for older prompts.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

const MAX_EXPLANATION_CHARS: usize = 200;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

/// One contiguous replacement of source lines in a single file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixEdit {
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    /// Expected current contents of the replaced lines.
    pub original_lines: Vec<String>,
    /// Replacement text; `\n` separates lines, empty deletes the range.
    pub replacement: String,
}

/// A validated fix proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixSuggestion {
    pub language: Option<String>,
    pub edits: Vec<FixEdit>,
    pub explanation: Option<String>,
    /// 0..=100.
    pub confidence: u8,
}

/// Permissive wire shape covering both schemas.
#[derive(Debug, Deserialize)]
struct RawSuggestion {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    edits: Vec<RawEdit>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    // Legacy single-edit schema.
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    original_lines: Vec<String>,
    #[serde(default)]
    replacement_lines: Option<Vec<String>>,
    #[serde(default)]
    start_line: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawEdit {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    start_line: u32,
    #[serde(default)]
    end_line: u32,
    #[serde(default)]
    original_lines: Vec<String>,
    #[serde(default)]
    replacement: Option<String>,
}

/// Parse LLM output into a validated [`FixSuggestion`]. Returns `None` for
/// anything unusable: no JSON, wrong shape, or a failed validation rule.
pub fn parse_fix_response(text: &str) -> Option<FixSuggestion> {
    if text.trim().is_empty() {
        return None;
    }
    let candidate = extract_json(text)?;
    let raw: RawSuggestion = match serde_json::from_str(&candidate) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(error = %err, "fix response JSON did not deserialize");
            return None;
        }
    };
    let suggestion = normalize(raw)?;
    validate(&suggestion).then_some(suggestion)
}

/// Isolate a JSON object from decorated text: the first fenced code block
/// wins, otherwise the shortest balanced object starting at the first `{`.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(caps) = FENCE_RE.captures(text) {
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Some(obj) = balanced_object(inner) {
            return Some(obj.to_string());
        }
    }
    balanced_object(text).map(|s| s.to_string())
}

/// The shortest prefix-balanced object in `text`, respecting JSON string and
/// escape state.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fold the legacy single-edit schema into the current one.
fn normalize(raw: RawSuggestion) -> Option<FixSuggestion> {
    let confidence = raw.confidence.unwrap_or(0.0);
    if !(0.0..=100.0).contains(&confidence) {
        return None;
    }

    let edits: Vec<FixEdit> = if !raw.edits.is_empty() {
        raw.edits
            .into_iter()
            .map(|e| {
                Some(FixEdit {
                    file_path: e.file_path,
                    start_line: e.start_line,
                    end_line: e.end_line,
                    original_lines: e.original_lines,
                    replacement: e.replacement?,
                })
            })
            .collect::<Option<Vec<_>>>()?
    } else if let (Some(file_path), Some(replacement_lines)) =
        (raw.file_path, raw.replacement_lines)
    {
        let start_line = raw.start_line.unwrap_or(1);
        let end_line = raw
            .end_line
            .unwrap_or_else(|| start_line + raw.original_lines.len().saturating_sub(1) as u32);
        vec![FixEdit {
            file_path,
            start_line,
            end_line,
            original_lines: raw.original_lines,
            replacement: replacement_lines.join("\n"),
        }]
    } else {
        return None;
    };

    Some(FixSuggestion {
        language: raw.language,
        edits,
        explanation: raw.explanation,
        confidence: confidence.round() as u8,
    })
}

/// All structural rules from one place: non-empty edits with sane bounds,
/// bounded explanation, and no overlapping ranges within a file.
fn validate(suggestion: &FixSuggestion) -> bool {
    if suggestion.edits.is_empty() || suggestion.confidence > 100 {
        return false;
    }
    if let Some(explanation) = &suggestion.explanation {
        if explanation.chars().count() > MAX_EXPLANATION_CHARS {
            return false;
        }
    }
    for edit in &suggestion.edits {
        if edit.file_path.trim().is_empty()
            || edit.start_line < 1
            || edit.end_line < edit.start_line
            || edit.original_lines.is_empty()
        {
            return false;
        }
    }

    // Within one file, edits sorted by start must not touch each other.
    let mut by_file: BTreeMap<&str, Vec<(u32, u32)>> = BTreeMap::new();
    for edit in &suggestion.edits {
        by_file
            .entry(edit.file_path.as_str())
            .or_default()
            .push((edit.start_line, edit.end_line));
    }
    for ranges in by_file.values_mut() {
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[0].1 >= pair[1].0 {
                return false;
            }
        }
    }
    true
}
