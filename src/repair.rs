//! Heuristic repair of tool-call JSON truncated or mangled by streaming.
//!
//! Runs only when the input does not already parse. The fixes are applied in
//! a fixed order and each one unconditionally; the output is not guaranteed to
//! parse. Callers still get the patched text in that case.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));
static DANGLING_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"("(?:[^"\\]|\\.)*"\s*:)\s*(\}|$)"#).expect("valid regex"));
static MISSING_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"("(?:[^"\\]|\\.)*"\s*:)\s*,"#).expect("valid regex"));

pub fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()
}

/// Repair `input` if it is not valid JSON; valid input is returned untouched.
pub fn repair_json(input: &str) -> String {
    if is_valid_json(input) {
        return input.to_string();
    }

    let mut text = input.trim().to_string();

    strip_last_trailing_comma(&mut text);
    close_unbalanced(&mut text, '{', '}');
    close_unbalanced(&mut text, '[', ']');

    if !text.starts_with('{') {
        text.insert(0, '{');
    }
    if !text.ends_with('}') {
        text.push('}');
    }

    text = DANGLING_KEY.replace_all(&text, "${1}null${2}").into_owned();
    text = MISSING_VALUE.replace_all(&text, "${1}null,").into_owned();

    if !is_valid_json(&text) {
        warn!(original = %input, repaired = %text, "tool-call JSON still invalid after repair");
    }

    text
}

/// Only the last `,}` / `,]` is removed; earlier ones are left as they are.
fn strip_last_trailing_comma(text: &mut String) {
    let last = TRAILING_COMMA
        .captures_iter(text)
        .last()
        .and_then(|caps| Some((caps.get(0)?.range(), caps.get(1)?.as_str().to_string())));

    if let Some((range, closer)) = last {
        text.replace_range(range, &closer);
    }
}

fn close_unbalanced(text: &mut String, open: char, close: char) {
    let opened = text.matches(open).count();
    let closed = text.matches(close).count();
    if opened > closed {
        text.extend(std::iter::repeat(close).take(opened - closed));
    }
}
