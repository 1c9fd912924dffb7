//! Upstream error classification.
//!
//! The one unit in the crate allowed to inspect upstream error text. The
//! generation service signals transient overload through a handful of status
//! codes and message markers; everything else is a permanent rejection.
//! Keeping the string matching here means the rest of the crate only ever
//! sees the two-member [`Disposition`] taxonomy.

use std::time::Duration;

/// Longest server-suggested delay we will honor (1 day).
const MAX_RETRY_AFTER_SECS: f64 = 86_400.0;

/// The two-member taxonomy every upstream failure maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient overload or unavailability; retry with backoff, honoring a
    /// server-supplied delay when present.
    Retryable { retry_after: Option<Duration> },
    /// Permanent rejection (bad input, auth, anything unrecognized);
    /// propagate immediately.
    Fatal,
}

impl Disposition {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Disposition::Retryable { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Disposition::Retryable { retry_after } => *retry_after,
            Disposition::Fatal => None,
        }
    }
}

const RETRYABLE_STATUS: &[u16] = &[429, 503];
const RETRYABLE_MARKERS: &[&str] =
    &["overloaded", "unavailable", "try again", "resource exhausted", "429", "503"];

/// Classify a raw upstream failure.
///
/// Retryable when the status code is 429/503 or the message carries one of
/// the documented overload markers; fatal otherwise. Matching is
/// case-insensitive on the message.
pub fn classify(status: Option<u16>, message: &str) -> Disposition {
    let lowered = message.to_ascii_lowercase();
    let retryable = status.is_some_and(|code| RETRYABLE_STATUS.contains(&code))
        || RETRYABLE_MARKERS.iter().any(|marker| lowered.contains(marker));
    if retryable {
        Disposition::Retryable { retry_after: retry_after_hint(&lowered) }
    } else {
        Disposition::Fatal
    }
}

/// Parse a server-suggested delay out of an error message.
///
/// Recognizes the human-readable `retry in 2.5s` phrasing and the structured
/// `"retryDelay": "7s"` field quota errors embed in their payload. Hints are
/// clamped to one day.
pub fn retry_after_hint(message: &str) -> Option<Duration> {
    let lowered = message.to_ascii_lowercase();
    seconds_after(&lowered, "retry in ").or_else(|| seconds_after(&lowered, "retrydelay\": \""))
}

fn seconds_after(text: &str, marker: &str) -> Option<Duration> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let digits = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|end| &rest[..end])
        .unwrap_or(rest);
    if !rest[digits.len()..].starts_with('s') {
        return None;
    }
    let seconds: f64 = digits.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds.min(MAX_RETRY_AFTER_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_markers_are_retryable() {
        for message in [
            "Error 503: The model is overloaded. Please try again later.",
            "service UNAVAILABLE",
            "resource exhausted for quota metric",
            "please try again in a moment",
        ] {
            assert!(classify(None, message).is_retryable(), "{message}");
        }
    }

    #[test]
    fn status_codes_override_message_content() {
        assert!(classify(Some(429), "quota exceeded").is_retryable());
        assert!(classify(Some(503), "").is_retryable());
        assert_eq!(classify(Some(400), "bad request"), Disposition::Fatal);
        assert_eq!(classify(Some(401), "invalid api key"), Disposition::Fatal);
    }

    #[test]
    fn unrecognized_errors_are_fatal() {
        assert_eq!(classify(None, "malformed request payload"), Disposition::Fatal);
        assert_eq!(classify(None, ""), Disposition::Fatal);
    }

    #[test]
    fn bare_status_digits_in_the_message_count() {
        assert!(classify(None, "got HTTP 503 from upstream").is_retryable());
        assert!(classify(None, "429 Too Many Requests").is_retryable());
    }

    #[test]
    fn retry_in_phrasing_is_parsed() {
        assert_eq!(
            retry_after_hint("quota exceeded, retry in 7s"),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            retry_after_hint("Retry in 2.5s."),
            Some(Duration::from_secs_f64(2.5))
        );
    }

    #[test]
    fn retry_delay_field_is_parsed() {
        let payload = r#"{"error": {"details": [{"@type": "type/RetryInfo", "retryDelay": "12s"}]}}"#;
        assert_eq!(retry_after_hint(payload), Some(Duration::from_secs(12)));
    }

    #[test]
    fn hint_requires_the_seconds_suffix() {
        assert_eq!(retry_after_hint("retry in 5 minutes"), None);
        assert_eq!(retry_after_hint("retry in soon"), None);
    }

    #[test]
    fn absent_hint_is_none() {
        assert_eq!(retry_after_hint("the model is overloaded"), None);
    }

    #[test]
    fn huge_hints_are_clamped() {
        let hint = retry_after_hint("retry in 99999999999999999999s").unwrap();
        assert_eq!(hint, Duration::from_secs(86_400));
    }

    #[test]
    fn hint_lands_in_the_disposition() {
        let disposition = classify(Some(429), "quota exceeded, retry in 30s");
        assert_eq!(disposition.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(classify(Some(400), "retry in 30s").retry_after(), None);
    }
}
