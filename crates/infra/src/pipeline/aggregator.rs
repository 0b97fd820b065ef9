//! Folding per-document outcomes into the session result set.

use matchwork_ai::parse_verdict;
use matchwork_core::{DocumentVerdict, SessionResultSet};

pub const EMPTY_RESPONSE: &str = "empty response";

/// Append exactly one entry for a processed document.
///
/// - `is_error` or blank `text`: an error entry carrying `error_message`, or
///   [`EMPTY_RESPONSE`] when no message is given
/// - otherwise the text (fenced or not) must decode as a verdict, or the
///   entry records `json unmarshal error: ...`
pub fn record(
    results: &mut SessionResultSet,
    text: &str,
    is_error: bool,
    error_message: Option<&str>,
) {
    let reason = error_message.filter(|m| !m.is_empty()).unwrap_or(EMPTY_RESPONSE);
    let entry = if is_error || text.trim().is_empty() {
        DocumentVerdict::failed(reason)
    } else {
        match parse_verdict(text) {
            Ok(verdict) => DocumentVerdict::Scored(verdict),
            Err(e) => DocumentVerdict::failed(format!("json unmarshal error: {e}")),
        }
    };
    results.push(entry);
}
