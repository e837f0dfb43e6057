//! Splitting oversized prompts and merging per-chunk results.

use serde_json::{Map, Value};

/// Splits `text` into windows of at most `chunk_bytes` bytes, each sharing
/// `overlap_bytes` with its predecessor. Windows never split a UTF-8
/// character.
#[must_use]
pub fn split_into_chunks(text: &str, chunk_bytes: usize, overlap_bytes: usize) -> Vec<&str> {
    if text.len() <= chunk_bytes || chunk_bytes == 0 {
        return vec![text];
    }
    let overlap = overlap_bytes.min(chunk_bytes.saturating_sub(1));

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let mut end = floor_char_boundary(text, (start + chunk_bytes).min(text.len()));
        if end <= start {
            end = ceil_char_boundary(text, start + 1);
        }
        chunks.push(&text[start..end]);
        if end >= text.len() {
            break;
        }

        let next = floor_char_boundary(text, end - overlap);
        start = if next > start { next } else { end };
    }
    chunks
}

/// Shallow-merges per-chunk values in order.
///
/// Object keys from later chunks overwrite earlier ones, except that two
/// arrays under the same key are concatenated. Top-level arrays are
/// concatenated under `items`. Scalars are ignored.
#[must_use]
pub fn merge_chunk_values(values: impl IntoIterator<Item = Value>) -> Value {
    let mut merged = Map::new();
    for value in values {
        match value {
            Value::Object(map) => {
                for (key, incoming) in map {
                    merge_key(&mut merged, key, incoming);
                }
            }
            Value::Array(items) => merge_key(&mut merged, "items".to_string(), Value::Array(items)),
            _ => {}
        }
    }
    Value::Object(merged)
}

fn merge_key(merged: &mut Map<String, Value>, key: String, incoming: Value) {
    match merged.get_mut(&key) {
        Some(Value::Array(existing)) if incoming.is_array() => {
            if let Value::Array(more) = incoming {
                existing.extend(more);
            }
        }
        _ => {
            merged.insert(key, incoming);
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
