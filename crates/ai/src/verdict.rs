//! Turning oracle text into a [`Verdict`].

use matchwork_core::Verdict;

const FENCE: &str = "```";

/// Remove a Markdown code fence around `text`, if any.
///
/// Handles an optional language tag after the opening fence and a missing
/// closing fence. Applying it twice gives the same result as applying it once.
pub fn strip_code_fence(text: &str) -> &str {
    let mut current = text;
    loop {
        let next = strip_once(current);
        if next.len() == current.len() {
            return next;
        }
        current = next;
    }
}

fn strip_once(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix(FENCE) {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-')))
            .unwrap_or(rest.len());
        s = rest[tag_len..].trim_start();
    }
    if let Some(rest) = s.strip_suffix(FENCE) {
        s = rest;
    }
    s.trim()
}

/// Strip any fence and decode the remaining JSON object.
pub fn parse_verdict(text: &str) -> Result<Verdict, serde_json::Error> {
    serde_json::from_str(strip_code_fence(text))
}
