//! Structural scan of a filter expression.
//!
//! The filter syntax (`key:value`, `!key:value`, `key:>5s`, `key:[a, b]`,
//! `has:key`, `AND`/`OR`, parentheses, quoted values, free text) is passed to
//! the backend verbatim. This scanner only extracts the *keys* so the
//! validator can check them against the field catalog.

use regex::Regex;
use std::sync::OnceLock;

use crate::equation::{parse_aggregate_call, AggregateCall};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterKey {
    pub name: String,
    pub negated: bool,
    /// Set when the key is an aggregate condition such as `count():>10`.
    pub aggregate: Option<AggregateCall>,
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*(\[[^\]]+\])?(\(.*\))?$")
            .expect("filter key pattern is a valid regex")
    })
}

/// Split a filter expression into tokens, honoring quotes, brackets and
/// function-call parentheses. Group parentheses are dropped.
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quote = false;
    let mut escape = false;
    let mut paren_depth = 0usize;
    let mut bracket_depth = 0usize;

    let flush = |cur: &mut String, tokens: &mut Vec<String>| {
        if !cur.is_empty() {
            tokens.push(std::mem::take(cur));
        }
    };

    for ch in query.chars() {
        if in_quote {
            cur.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_quote = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_quote = true;
                cur.push(ch);
            }
            '[' => {
                bracket_depth += 1;
                cur.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth.saturating_sub(1);
                cur.push(ch);
            }
            '(' if cur.is_empty() || cur == "!" => {
                // Group open; a leading `!` negates the group, not a key.
                cur.clear();
            }
            '(' => {
                paren_depth += 1;
                cur.push(ch);
            }
            ')' if paren_depth > 0 => {
                paren_depth -= 1;
                cur.push(ch);
            }
            ')' => flush(&mut cur, &mut tokens),
            c if c.is_whitespace() && bracket_depth == 0 && paren_depth == 0 => {
                flush(&mut cur, &mut tokens)
            }
            c => cur.push(c),
        }
    }
    flush(&mut cur, &mut tokens);
    tokens
}

/// Position of the key/value separator: the first `:` outside parentheses.
fn separator_index(token: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in token.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '"' if depth == 0 => return None,
            ':' if depth == 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Extract every key referenced by a filter expression.
pub fn filter_keys(query: &str) -> Vec<FilterKey> {
    let mut out = Vec::new();
    for token in tokenize(query) {
        if token == "AND" || token == "OR" {
            continue;
        }
        let (negated, body) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };
        let Some(sep) = separator_index(body) else {
            continue;
        };
        let key = &body[..sep];
        let value = body[sep + 1..].trim_matches('"');
        if !key_regex().is_match(key) {
            continue;
        }
        if key == "has" {
            if !value.is_empty() {
                out.push(FilterKey {
                    name: value.to_string(),
                    negated,
                    aggregate: None,
                });
            }
            continue;
        }
        out.push(FilterKey {
            name: key.to_string(),
            negated,
            aggregate: parse_aggregate_call(key),
        });
    }
    out
}
