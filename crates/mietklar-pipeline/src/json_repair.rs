//! Best-effort recovery of JSON from model output.
//!
//! Models wrap JSON in Markdown fences, emit Python-style literals, or leave
//! trailing commas. `repair` walks a fixed recovery ladder and returns `None`
//! when nothing parses; callers treat `None` as "no usable structured
//! output", never as an error to propagate.

use serde_json::Value as JsonValue;
use tracing::debug;

/// Attempt to parse possibly-malformed JSON.
///
/// Ladder: strict parse, then fence stripping, then textual substitutions
/// (trailing commas removed, single quotes doubled, Python literals
/// lowercased), each followed by a re-parse.
pub fn repair(raw: &str) -> Option<JsonValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced.trim()) {
        return Some(value);
    }

    let substituted = apply_substitutions(unfenced.trim());
    match serde_json::from_str(&substituted) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "JSON repair exhausted");
            None
        }
    }
}

/// Extract the body of the first Markdown code fence, if any.
fn strip_code_fences(input: &str) -> &str {
    let Some(open) = input.find("```") else {
        return input;
    };
    let after_open = &input[open + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Fixed substitution pass: trailing commas, quote style, literal casing.
fn apply_substitutions(input: &str) -> String {
    remove_trailing_commas(input)
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null")
}

/// Remove commas directly preceding a closing bracket or brace,
/// whitespace-tolerant, outside of string literals.
fn remove_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = input.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next_meaningful = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next_meaningful, Some(']') | Some('}')) {
                    continue;
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out
}
