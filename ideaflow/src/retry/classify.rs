//! Error classification helpers for the default retry condition.

/// Message fragments that indicate a transient transport or decoding glitch.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "connection reset",
    "connection closed",
    "socket hang up",
    "eai_again",
    "temporarily unavailable",
    "json",
    "unexpected token",
    "unexpected end",
    "parse error",
    "failed to parse",
];

/// Returns true for HTTP statuses worth retrying: 408, 429 and any 5xx.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}

/// Returns true if an error message suggests a timeout or a JSON decoding
/// failure, either of which may be an upstream glitch.
#[must_use]
pub fn message_indicates_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}
