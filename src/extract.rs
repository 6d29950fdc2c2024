//! Fault-tolerant extraction of structured objects and tagged segments
//! from raw model output.
//!
//! Model output is adversarial: fenced blocks are frequently truncated,
//! quote styles drift, and closing markers go missing. Both extraction
//! contracts here degrade through progressively looser matching before
//! giving up.

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// Extract and parse a structured object from raw model text.
///
/// Tries, in order:
/// 1. a fully closed ```json fenced block;
/// 2. a ```json fence whose closing marker is missing (truncated output) —
///    everything after the opener is taken;
/// 3. the first `{` or `[` in the text, taking everything to the end.
///
/// The candidate region is then handed to the relaxed repair parser, which
/// fixes common defects (single quotes, trailing commas, Python literals,
/// unterminated strings and brackets) before structural parsing.
pub fn extract_json(text: &str) -> Result<Value> {
    let complete = Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap();
    let partial = Regex::new(r"(?s)```json\s*(\{.*)").unwrap();

    let candidate = if let Some(m) = complete.captures(text) {
        m.get(1).map(|g| g.as_str())
    } else if let Some(m) = partial.captures(text) {
        m.get(1).map(|g| g.as_str())
    } else {
        let brace = text.find('{');
        let bracket = text.find('[');
        match (brace, bracket) {
            (Some(b), Some(k)) => Some(&text[b.min(k)..]),
            (Some(b), None) => Some(&text[b..]),
            (None, Some(k)) => Some(&text[k..]),
            (None, None) => None,
        }
    };

    let candidate = candidate
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            Error::NotFound("no JSON-like structure (including incomplete ones) in text".into())
        })?;

    repair_json(candidate)
}

/// Parse a JSON candidate, repairing common model-output defects first.
///
/// Well-formed input is parsed directly. Otherwise the candidate is
/// rewritten: single-quoted strings become double-quoted, Python literals
/// (`True`/`False`/`None`) become JSON literals, trailing commas are
/// dropped, and a truncated tail is closed out (unterminated string, then
/// dangling `:` or `,`, then the open bracket stack).
pub fn repair_json(candidate: &str) -> Result<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return Ok(v);
    }

    let rewritten = rewrite_relaxed(candidate);
    serde_json::from_str(&rewritten).map_err(|e| {
        Error::RepairFailed(format!("could not parse repaired candidate: {e}"))
    })
}

fn rewrite_relaxed(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    // Quote character of the string currently being scanned, if any.
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            if escaped {
                // Normalize \' (not a JSON escape) back to a bare quote.
                if c == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(c);
                }
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                out.push('"');
                in_string = None;
            } else if c == '"' {
                // A double quote inside a single-quoted string must be escaped
                // once the string is normalized to double quotes.
                out.push('\\');
                out.push('"');
            } else if c == '\n' {
                out.push_str("\\n");
            } else {
                out.push(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                in_string = Some(c);
                out.push('"');
            }
            '{' | '[' => {
                stack.push(c);
                out.push(c);
            }
            '}' | ']' => {
                trim_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
                // First complete top-level value consumed; anything after it
                // is trailing prose, not structure.
                if stack.is_empty() {
                    break;
                }
            }
            c if c.is_alphabetic() => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" | "NaN" => out.push_str("null"),
                    other => out.push_str(other),
                }
            }
            c => out.push(c),
        }
    }

    // Close out a truncated tail.
    if escaped {
        out.push('\\');
    }
    if in_string.is_some() {
        out.push('"');
    }
    loop {
        let trimmed = out.trim_end();
        if trimmed.ends_with(',') {
            let cut = trimmed.len() - 1;
            out.truncate(cut);
        } else if trimmed.ends_with(':') {
            out.truncate(trimmed.len());
            out.push_str(" null");
        } else {
            out.truncate(trimmed.len());
            break;
        }
    }
    while let Some(open) = stack.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }

    out
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end();
    if trimmed.ends_with(',') {
        let cut = trimmed.len() - 1;
        out.truncate(cut);
    }
}

/// Extract the content of a tagged segment, tolerating malformed or
/// missing closing tags.
///
/// Tries, in order: `<tag>…</tag>`, `<tag>…<` (malformed closer), and
/// `<tag>…` to end of text (total truncation). Tag matching is
/// case-insensitive. Returns trimmed content, or [`Error::NotFound`] when
/// no opening tag is present or the matched content is empty.
pub fn extract_tagged(text: &str, tag: &str) -> Result<String> {
    let esc = regex::escape(tag);
    let patterns = [
        format!(r"(?is)<{esc}>(.*?)</{esc}>"),
        format!(r"(?is)<{esc}>(.*?)<"),
        format!(r"(?is)<{esc}>(.*)"),
    ];

    for pattern in &patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(m) = re.captures(text) {
            let content = m.get(1).map(|g| g.as_str().trim()).unwrap_or("");
            if !content.is_empty() {
                return Ok(content.to_string());
            }
        }
    }

    Err(Error::NotFound(format!(
        "no non-empty <{tag}> segment in text"
    )))
}
