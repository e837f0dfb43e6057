//! Semantic cache keys.

use sha2::{Digest, Sha256};

/// How much of the system message contributes to the key.
pub const SYSTEM_PREFIX_CHARS: usize = 200;

/// Derives a cache key from the semantic content of a completion request.
///
/// Runs of whitespace are collapsed before hashing, so prompts that differ
/// only in formatting share an entry. Only the first
/// [`SYSTEM_PREFIX_CHARS`] characters of the system message are considered.
#[must_use]
pub fn cache_key(context: Option<&str>, system: Option<&str>, prompt: &str) -> String {
    let system_prefix: String = system
        .map(collapse_whitespace)
        .unwrap_or_default()
        .chars()
        .take(SYSTEM_PREFIX_CHARS)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(context.map(str::trim).unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(system_prefix.as_bytes());
    hasher.update([0x1f]);
    hasher.update(collapse_whitespace(prompt).as_bytes());
    hex::encode(hasher.finalize())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
