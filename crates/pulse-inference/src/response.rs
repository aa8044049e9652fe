//! Parsing of free-form model responses.
//!
//! Models wrap JSON in prose, code fences or reasoning blocks. Parsing here
//! is tolerant about the wrapping and strict about the schema: anything that
//! does not deserialize into the expected type becomes a
//! [`ParsedResponse::ParseError`] for the caller to handle.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// Result of parsing a model response against a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse<T> {
    Parsed(T),
    ParseError(String),
}

impl<T> ParsedResponse<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParsedResponse::Parsed(value) => Some(value),
            ParsedResponse::ParseError(_) => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ParsedResponse::Parsed(_))
    }
}

fn thinking_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<think(?:ing)?>.*?</think(?:ing)?>").expect("valid regex"))
}

fn label_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:#+\s*)?(?:\*\*)?(?:title|summary|document)(?:\*\*)?\s*:\s*(?:\*\*)?")
            .expect("valid regex")
    })
}

/// Remove `<think>…</think>` reasoning blocks emitted by thinking models.
pub fn strip_thinking(text: &str) -> String {
    thinking_block().replace_all(text, "").trim().to_string()
}

/// Slice from the first `{` to the last `}` inclusive.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the JSON object embedded in `text` into `T`.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> ParsedResponse<T> {
    let cleaned = strip_thinking(text);
    let Some(json) = extract_json_object(&cleaned) else {
        return ParsedResponse::ParseError("no JSON object in response".to_string());
    };
    match serde_json::from_str(json) {
        Ok(value) => ParsedResponse::Parsed(value),
        Err(e) => ParsedResponse::ParseError(e.to_string()),
    }
}

fn strip_label(line: &str) -> String {
    let stripped = label_prefix().replace(line, "");
    stripped
        .trim()
        .trim_start_matches('#')
        .trim_matches('*')
        .trim()
        .to_string()
}

/// Split a summary response into `(title, summary)`.
///
/// The title is the first non-empty line; the summary is everything after
/// it, or the whole text when there is nothing after it. Leading labels such
/// as `Title:` are removed. Returns `None` for an empty response.
pub fn split_title_summary(text: &str) -> Option<(String, String)> {
    let cleaned = strip_thinking(text);
    let lines: Vec<&str> = cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let (first, rest) = lines.split_first()?;

    let title = strip_label(first);
    let summary = if rest.is_empty() {
        title.clone()
    } else {
        let body = rest.join("\n");
        strip_label(&body)
    };
    if title.is_empty() && summary.is_empty() {
        return None;
    }
    Some((title, summary))
}
