//! Best-effort repair of almost-JSON model output.
//!
//! Handles what streaming models typically get wrong at the end of a reply:
//! markdown fences, prose before the first brace, unterminated strings,
//! missing closing brackets, and trailing commas.

use serde_json::Value;

/// Decode `content` as JSON, applying one repair pass if the plain parse fails.
pub fn decode_structured(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed)
        .ok()
        .or_else(|| serde_json::from_str(&repair(trimmed)).ok())
}

/// Rewrite `input` into something more likely to parse. Never fails; input
/// without any object or array is returned trimmed.
pub fn repair(input: &str) -> String {
    let body = strip_fences(input.trim());
    let Some(start) = body.find(['{', '[']) else {
        return body.to_string();
    };
    let body = &body[start..];

    let mut out = String::with_capacity(body.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in body.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                closers.push('}');
                out.push(ch);
            }
            '[' => {
                closers.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                if closers.last() == Some(&ch) {
                    let _ = closers.pop();
                    trim_trailing_comma(&mut out);
                    out.push(ch);
                }
                // mismatched closer: drop it
            }
            _ => out.push(ch),
        }

        if closers.is_empty() && !out.is_empty() {
            // complete top-level value; ignore trailing prose
            break;
        }
    }

    if in_string {
        if escaped {
            let _ = out.pop();
        }
        out.push('"');
    }

    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        if out.trim_end().ends_with(':') {
            out.push_str("null");
        }
        out.push(closer);
    }
    out
}

fn strip_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim_end()
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        let _ = out.pop();
    }
}
