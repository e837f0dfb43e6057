//! Bounded response cache shared by every outbound call site.
//!
//! Entries expire after a fixed TTL and the store never holds more than
//! `max_size` live entries. When full, the entry with the fewest hits is
//! evicted, oldest first among equals.

mod bounded;
mod key;

pub use bounded::{BoundedCache, CacheStats};
pub use key::{cache_key, SYSTEM_PREFIX_CHARS};
