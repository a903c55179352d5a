//! JSON parser with fuzzy repair and streaming-prefix completion

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::parser::{ParseError, ParseResult};

/// JSON parser for model output.
///
/// [`parse`](JsonParser::parse) handles complete output that may be wrapped
/// in prose or code fences. [`parse_partial`](JsonParser::parse_partial)
/// reads a prefix of output that is still streaming in, closing whatever
/// strings, objects and arrays are still open.
#[derive(Debug, Clone)]
pub struct JsonParser {
    attempt_repair: bool,
}

/// Scanner state at the end of the inspected text
struct Scan {
    /// Byte offset one past the root value, or the input length if it never closed
    end: usize,
    /// Open containers, innermost last
    stack: Vec<u8>,
    in_string: bool,
    /// Whether the last byte was an unconsumed backslash inside a string
    escape: bool,
    /// Offsets where the text can be cut and still be closed validly,
    /// paired with the containers open at that point
    boundaries: Vec<(usize, Vec<u8>)>,
}

impl JsonParser {
    /// Create a parser that repairs common defects
    pub fn new() -> Self {
        Self {
            attempt_repair: true,
        }
    }

    /// Create a strict parser (no repair)
    pub fn strict() -> Self {
        Self {
            attempt_repair: false,
        }
    }

    /// Parse complete output.
    ///
    /// Leading prose and code fences are skipped. With repair enabled,
    /// trailing commas are removed and unclosed containers are closed.
    pub fn parse(&self, raw: &str) -> ParseResult<Value> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        if let Ok(value) = serde_json::from_str::<Value>(input) {
            return Ok(value);
        }

        let Some(start) = input.find(['{', '[']) else {
            return Err(ParseError::InvalidFormat("No JSON value found".to_string()));
        };
        let body = &input[start..];
        let scan = scan(body);

        if scan.end < body.len() || !scan.stack.is_empty() || scan.in_string {
            // Root closed early: ignore anything after it
            if scan.stack.is_empty() && !scan.in_string {
                if let Ok(value) = serde_json::from_str::<Value>(&body[..scan.end]) {
                    return Ok(value);
                }
            }
        }

        if !self.attempt_repair {
            return Err(ParseError::InvalidFormat(
                "Malformed JSON and repair is disabled".to_string(),
            ));
        }

        static TRAILING_COMMA_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

        complete(body, &scan, |candidate| {
            let cleaned = TRAILING_COMMA_RE.replace_all(candidate, "$1");
            serde_json::from_str::<Value>(&cleaned).ok()
        })
        .ok_or_else(|| ParseError::InvalidFormat("Failed to parse JSON after repair".to_string()))
    }

    /// Parse a prefix of streaming output.
    ///
    /// Returns the most complete value the prefix supports, dropping only a
    /// trailing member that cannot be closed yet (a dangling key, a partial
    /// literal). Fails with [`ParseError::Incomplete`] while no object or
    /// array has started.
    pub fn parse_partial(&self, raw: &str) -> ParseResult<Value> {
        if raw.trim().is_empty() {
            return Err(ParseError::EmptyInput);
        }
        let Some(start) = raw.find(['{', '[']) else {
            return Err(ParseError::Incomplete);
        };
        let body = &raw[start..];
        let scan = scan(body);

        complete(body, &scan, |candidate| {
            serde_json::from_str::<Value>(candidate).ok()
        })
        .ok_or(ParseError::Incomplete)
    }
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

fn scan(text: &str) -> Scan {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut boundaries = Vec::new();
    let mut end = bytes.len();

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                stack.push(b);
                boundaries.push((i + 1, stack.clone()));
            }
            b'}' | b']' => {
                stack.pop();
                if stack.is_empty() {
                    end = i + 1;
                    break;
                }
                boundaries.push((i + 1, stack.clone()));
            }
            b',' => boundaries.push((i, stack.clone())),
            _ => {}
        }
    }

    Scan {
        end,
        stack,
        in_string,
        escape,
        boundaries,
    }
}

fn closers(stack: &[u8]) -> String {
    stack
        .iter()
        .rev()
        .map(|&open| if open == b'{' { '}' } else { ']' })
        .collect()
}

/// Length of `text` with an unfinished `\uXXXX` escape or lone backslash removed
fn without_partial_escape(text: &str, escape: bool) -> usize {
    if escape {
        return text.len() - 1;
    }
    let bytes = text.as_bytes();
    let tail_start = bytes.len().saturating_sub(5);
    for i in (tail_start..bytes.len()).rev() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'u') {
            let hex_digits = bytes.len() - (i + 2);
            if hex_digits < 4 {
                return i;
            }
        }
    }
    bytes.len()
}

/// Try closing the whole text, then successively shorter cuts
fn complete<F>(text: &str, scan: &Scan, mut attempt: F) -> Option<Value>
where
    F: FnMut(&str) -> Option<Value>,
{
    let head = &text[..scan.end];

    let mut candidate = if scan.in_string {
        let keep = without_partial_escape(head, scan.escape);
        let mut s = head[..keep].to_string();
        s.push('"');
        s
    } else {
        head.to_string()
    };
    candidate.push_str(&closers(&scan.stack));

    if let Some(value) = attempt(&candidate) {
        return Some(value);
    }

    scan.boundaries.iter().rev().find_map(|(cut, open)| {
        let mut candidate = text[..*cut].to_string();
        candidate.push_str(&closers(open));
        attempt(&candidate)
    })
}
