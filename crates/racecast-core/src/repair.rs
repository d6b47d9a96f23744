//! Response repair and parsing.
//!
//! Model output is not a contract. Before parsing, the raw text goes through
//! an ordered list of [`REPAIR_STEPS`]. Each step is a pure function that is
//! idempotent and leaves any valid JSON object or array byte-for-byte
//! unchanged, so steps can be added or reordered without re-verifying the
//! whole chain.
//!
//! After repair the text is parsed, checked against the response schema and
//! deserialized. Any failure yields a [`MalformedResponseError`] carrying the
//! cleaned text; defaults are never substituted.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::schema::validate_response_schema;
use crate::types::SynthesisResponse;

lazy_static! {
    /// An opening fence with an optional info string (```json).
    static ref OPEN_FENCE: Regex = Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").unwrap();
}

/// The model's response could not be turned into a structured result.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed model response: {reason}")]
pub struct MalformedResponseError {
    /// What went wrong
    pub reason: String,

    /// The text after all repair steps, for diagnostics
    pub cleaned: String,
}

impl MalformedResponseError {
    fn new(reason: impl Into<String>, cleaned: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cleaned: cleaned.into(),
        }
    }

    /// The start of the cleaned text, for log lines.
    pub fn excerpt(&self, max: usize) -> String {
        truncate(&self.cleaned, max)
    }
}

/// A single named repair rule.
#[derive(Clone, Copy)]
pub struct RepairStep {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for RepairStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairStep").field("name", &self.name).finish()
    }
}

/// Repair rules, in application order.
pub const REPAIR_STEPS: &[RepairStep] = &[
    RepairStep {
        name: "strip_code_fences",
        apply: strip_code_fences,
    },
    RepairStep {
        name: "collapse_thousands_separators",
        apply: collapse_thousands_separators,
    },
    RepairStep {
        name: "remove_trailing_commas",
        apply: remove_trailing_commas,
    },
    RepairStep {
        name: "trim_to_json_body",
        apply: trim_to_json_body,
    },
];

/// Run every repair step over the raw text.
pub fn repair(raw: &str) -> String {
    REPAIR_STEPS.iter().fold(raw.to_string(), |text, step| {
        let repaired = (step.apply)(&text);
        if repaired != text {
            tracing::debug!(step = step.name, "Repaired model response");
        }
        repaired
    })
}

/// Repair and parse into an untyped JSON value.
pub fn parse_json(raw: &str) -> Result<JsonValue, MalformedResponseError> {
    if raw.trim().is_empty() {
        return Err(MalformedResponseError::new("empty response", raw));
    }

    let cleaned = repair(raw);
    serde_json::from_str(&cleaned)
        .map_err(|e| MalformedResponseError::new(format!("invalid JSON: {}", e), cleaned))
}

/// Repair, parse, schema-check and deserialize a synthesis response.
pub fn parse_response(raw: &str) -> Result<SynthesisResponse, MalformedResponseError> {
    let value = parse_json(raw)?;

    if let Err(errors) = validate_response_schema(&value) {
        return Err(MalformedResponseError::new(
            format!("schema violation: {}", errors.join("; ")),
            value.to_string(),
        ));
    }

    serde_json::from_value(value.clone()).map_err(|e| {
        MalformedResponseError::new(format!("unexpected shape: {}", e), value.to_string())
    })
}

// ============================================================================
// Repair steps
// ============================================================================

/// Extract the body of a Markdown code fence.
///
/// Only applies when the fence opens before any JSON structure. Fences inside
/// string literals are skipped when looking for either end of the block.
pub fn strip_code_fences(text: &str) -> String {
    let Some(fence_at) = unquoted_fence(text) else {
        return text.to_string();
    };

    let structure_at = text.find(|c: char| c == '{' || c == '[');
    if matches!(structure_at, Some(pos) if pos < fence_at) || text.trim_start().starts_with('"') {
        return text.to_string();
    }

    let fenced = &text[fence_at..];
    let body_start = OPEN_FENCE.find(fenced).map_or(3, |m| m.end());
    let body = &fenced[body_start..];

    // Unterminated fence: keep everything after the opening line.
    match unquoted_fence(body).or_else(|| body.find("```")) {
        Some(end) => body[..end].trim().to_string(),
        None => body.trim().to_string(),
    }
}

/// Offset of the first fence outside a JSON string literal.
fn unquoted_fence(text: &str) -> Option<usize> {
    let mut lexer = Lexer::default();
    for (i, c) in text.char_indices() {
        if !lexer.in_string() && text[i..].starts_with("```") {
            return Some(i);
        }
        lexer.advance(c);
    }
    None
}

/// Remove thousands separators from numeric literals (`805,374` -> `805374`).
///
/// Only commas between two digits, outside string literals, in object-value or
/// top-level position are removed. Inside arrays such a comma is a legitimate
/// element separator and is kept.
pub fn collapse_thousands_separators(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut lexer = Lexer::default();

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' && !lexer.in_string() && !lexer.in_array() {
            let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
            let next_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if prev_digit && next_digit {
                lexer.advance(c);
                continue;
            }
        }
        lexer.advance(c);
        out.push(c);
    }

    out
}

/// Remove commas that directly precede a closing `}` or `]`.
///
/// Runs of commas before a closer (`[1,,]`) are removed together.
pub fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut lexer = Lexer::default();

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' && !lexer.in_string() {
            let next = chars[i + 1..]
                .iter()
                .find(|n| !n.is_whitespace() && **n != ',');
            if matches!(next, Some('}') | Some(']')) {
                lexer.advance(c);
                continue;
            }
        }
        lexer.advance(c);
        out.push(c);
    }

    out
}

/// Drop prose before the first `{` and after the container it opens.
///
/// Text that already parses as JSON, of any kind, is returned unchanged.
/// Whitespace-only surroundings are kept, as is text that already starts
/// with `{` or `[`.
pub fn trim_to_json_body(text: &str) -> String {
    if serde_json::from_str::<JsonValue>(text).is_ok() {
        return text.to_string();
    }

    let Some(start) = text.find(|c: char| !c.is_whitespace()) else {
        return text.to_string();
    };

    let open = if text[start..].starts_with('{') || text[start..].starts_with('[') {
        start
    } else {
        match text.find('{') {
            Some(pos) => pos,
            None => return text.to_string(),
        }
    };

    let prefix = &text[..open];
    let keep_prefix = if prefix.trim().is_empty() { prefix } else { "" };

    let body = &text[open..];
    match matching_close(body) {
        Some(end) => {
            let close = open + end + 1;
            let suffix = &text[close..];
            let keep_suffix = if suffix.trim().is_empty() { suffix } else { "" };
            format!("{}{}{}", keep_prefix, &text[open..close], keep_suffix)
        }
        None => format!("{}{}", keep_prefix, body),
    }
}

/// Byte offset of the bracket closing the container that opens `body`.
fn matching_close(body: &str) -> Option<usize> {
    let mut lexer = Lexer::default();
    for (i, c) in body.char_indices() {
        let structural = !lexer.in_string();
        lexer.advance(c);
        if structural && (c == '}' || c == ']') && lexer.depth() == 0 {
            return Some(i);
        }
    }
    None
}

/// Minimal JSON lexical state: string literals and container nesting.
#[derive(Default)]
struct Lexer {
    in_string: bool,
    escaped: bool,
    containers: Vec<char>,
}

impl Lexer {
    fn in_string(&self) -> bool {
        self.in_string
    }

    fn in_array(&self) -> bool {
        self.containers.last() == Some(&'[')
    }

    fn depth(&self) -> usize {
        self.containers.len()
    }

    fn advance(&mut self, c: char) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            return;
        }

        match c {
            '"' => self.in_string = true,
            '{' | '[' => self.containers.push(c),
            '}' | ']' => {
                self.containers.pop();
            }
            _ => {}
        }
    }
}

/// Truncate a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}
