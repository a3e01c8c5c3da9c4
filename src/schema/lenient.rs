// src/schema/lenient.rs
//! Lenient JSON reader for oracle output.
//!
//! Order: locate the JSON candidate (code fences, prose around it), strict
//! parse, then one tolerant rewrite (trailing commas, unquoted keys,
//! single quotes, comments, Python literals, truncated tails) and parse again.

use serde_json::Value;

use super::SchemaError;

pub fn lenient_parse(text: &str) -> Result<Value, SchemaError> {
    let candidate = extract_json_candidate(text).ok_or(SchemaError::NoJson)?;
    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return Ok(v);
    }
    let repaired = repair_json_text(candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(v) => {
            tracing::debug!(target: "schema", "tolerant JSON rewrite succeeded");
            Ok(v)
        }
        Err(e) => {
            tracing::debug!(target: "schema", error = %e, "tolerant JSON rewrite failed");
            Err(SchemaError::NoJson)
        }
    }
}

/// Slice of `text` that most likely holds the JSON value.
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    let body = strip_code_fence(text).unwrap_or(text);
    let start = body.find(&['{', '['][..])?;
    let tail = &body[start..];
    Some(match balanced_end(tail) {
        Some(end) => &tail[..end],
        // Unbalanced: hand the truncated tail to the tolerant rewrite.
        None => tail.trim_end(),
    })
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let nl = after.find('\n')?;
    let inner = &after[nl + 1..];
    let end = inner.find("```").unwrap_or(inner.len());
    let candidate = inner[..end].trim();
    if candidate.starts_with('{') || candidate.starts_with('[') {
        Some(candidate)
    } else {
        None
    }
}

/// Byte offset just past the bracket that closes the first one in `s`.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in s.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrite almost-JSON into JSON. Never invents content beyond closing
/// brackets/quotes that a truncated reply left open.
pub fn repair_json_text(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut closers: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = read_string(&chars, i, &mut out);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                strip_trailing_comma(&mut out);
                if closers.last() == Some(&c) {
                    closers.pop();
                }
                out.push(c);
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E' | '+' | '-'))
                {
                    out.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|ch| !ch.is_whitespace());
                if next == Some(&':') {
                    push_quoted(&mut out, &word);
                } else {
                    match word.as_str() {
                        "true" | "True" => out.push_str("true"),
                        "false" | "False" => out.push_str("false"),
                        "null" | "None" | "undefined" => out.push_str("null"),
                        _ => push_quoted(&mut out, &word),
                    }
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    while let Some(closer) = closers.pop() {
        strip_trailing_comma(&mut out);
        if out.trim_end().ends_with(':') {
            out.push_str("null");
        }
        out.push(closer);
    }
    out
}

/// Copies the string starting at `chars[start]` (either quote style) as a
/// double-quoted JSON string. Returns the index after the closing quote.
fn read_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some('\'') => out.push('\''),
                    Some(&n) => {
                        out.push('\\');
                        out.push(n);
                    }
                    None => {}
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }
    // truncated inside a string
    out.push('"');
    i
}

fn push_quoted(out: &mut String, word: &str) {
    out.push('"');
    out.push_str(&word.replace('"', "\\\""));
    out.push('"');
}

fn strip_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}
