//! Recovery parser for structured data embedded in model output.
//!
//! Model replies are supposed to be JSON but often arrive wrapped in
//! markdown fences, padded with commentary, truncated, or written with
//! non-ASCII quotes. [`RecoveryParser::parse`] runs an ordered cascade of
//! extraction strategies and always returns a value: the first candidate
//! that passes structural validation, or a fallback.
//!
//! ```rust,ignore
//! let parser = RecoveryParser::new();
//! let value = parser.parse("```json\n{\"a\":1,}\n```", None, Some("analysis"));
//! assert_eq!(value, serde_json::json!({"a": 1}));
//! ```

mod preprocess;
mod strategies;

pub use preprocess::preprocess;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::IdeaflowError;
use crate::events::{names, EventSink, NoOpEventSink};

/// The strategy that produced a parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The text was valid JSON as-is.
    Direct,
    /// A fenced code block held valid JSON.
    FencedBlock,
    /// The outermost bracket span held valid JSON.
    BracketSpan,
    /// Syntactic clean-up (trailing commas, bare keys, quote style).
    FuzzyRepair,
    /// Structural repair (prefix/suffix trimming, auto-closing).
    SmartRepair,
    /// Reconstruction from `key: value` lines.
    KeyValue,
    /// Every strategy failed.
    Fallback,
}

impl StrategyKind {
    /// All kinds in cascade order.
    pub const ALL: [Self; 7] = [
        Self::Direct,
        Self::FencedBlock,
        Self::BracketSpan,
        Self::FuzzyRepair,
        Self::SmartRepair,
        Self::KeyValue,
        Self::Fallback,
    ];

    /// Returns the snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::FencedBlock => "fenced_block",
            Self::BracketSpan => "bracket_span",
            Self::FuzzyRepair => "fuzzy_repair",
            Self::SmartRepair => "smart_repair",
            Self::KeyValue => "key_value",
            Self::Fallback => "fallback",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Strategy = fn(&str) -> Option<Value>;

const CASCADE: [(StrategyKind, Strategy); 6] = [
    (StrategyKind::Direct, strategies::direct),
    (StrategyKind::FencedBlock, strategies::fenced_block),
    (StrategyKind::BracketSpan, strategies::bracket_span),
    (StrategyKind::FuzzyRepair, strategies::fuzzy_repair),
    (StrategyKind::SmartRepair, strategies::smart_repair),
    (StrategyKind::KeyValue, strategies::key_value_lines),
];

/// A parse result with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    /// The recovered value.
    pub value: Value,
    /// Which strategy produced it.
    pub strategy: StrategyKind,
}

impl ParseOutcome {
    /// Returns true if no strategy succeeded.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.strategy == StrategyKind::Fallback
    }
}

/// Per-strategy success counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserStats {
    /// Successful parses keyed by strategy, including fallbacks.
    pub by_strategy: BTreeMap<StrategyKind, u64>,
    /// Total parse calls.
    pub total: u64,
}

impl ParserStats {
    /// Returns the count for one strategy.
    #[must_use]
    pub fn count(&self, strategy: StrategyKind) -> u64 {
        self.by_strategy.get(&strategy).copied().unwrap_or(0)
    }
}

/// Structural validation: non-null, and an object or a non-empty array.
#[must_use]
pub fn is_structurally_valid(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// Builds the marker returned when nothing could be recovered and no
/// fallback was supplied.
#[must_use]
pub fn fallback_marker(context: Option<&str>) -> Value {
    json!({
        "error": "Failed to parse structured response",
        "context": context.unwrap_or("unknown"),
        "fallback": true,
    })
}

/// Runs the strategy cascade and keeps counters.
pub struct RecoveryParser {
    counters: [AtomicU64; 7],
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for RecoveryParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryParser")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for RecoveryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryParser {
    /// Creates a parser that emits no events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Parses `raw`, returning `fallback` (or a marker object) when every
    /// strategy fails. Never panics.
    pub fn parse(&self, raw: &str, fallback: Option<&Value>, context: Option<&str>) -> Value {
        self.parse_detailed(raw, fallback, context).value
    }

    /// Like [`Self::parse`], also reporting the winning strategy.
    pub fn parse_detailed(
        &self,
        raw: &str,
        fallback: Option<&Value>,
        context: Option<&str>,
    ) -> ParseOutcome {
        let text = preprocess(raw);
        let label = context.unwrap_or("unknown");

        for (kind, strategy) in CASCADE {
            let Some(value) = strategy(&text) else {
                continue;
            };
            if !is_structurally_valid(&value) {
                continue;
            }

            self.record(kind);
            if kind != StrategyKind::Direct {
                debug!(context = %label, strategy = %kind, "recovered structured output");
                self.events.emit(
                    names::PARSER_RECOVERED,
                    Some(json!({ "context": label, "strategy": kind })),
                );
            }
            return ParseOutcome { value, strategy: kind };
        }

        self.record(StrategyKind::Fallback);
        let preview: String = raw.chars().take(120).collect();
        warn!(context = %label, preview = %preview, "no parse strategy succeeded");
        self.events.emit(
            names::PARSER_FALLBACK,
            Some(json!({
                "context": label,
                "supplied_fallback": fallback.is_some(),
                "length": raw.len(),
            })),
        );
        ParseOutcome {
            value: fallback.cloned().unwrap_or_else(|| fallback_marker(context)),
            strategy: StrategyKind::Fallback,
        }
    }

    /// Recovers a value and deserialises it into `T`.
    ///
    /// Fails if every strategy failed or the recovered value does not match
    /// `T`.
    pub fn parse_as<T: DeserializeOwned>(&self, raw: &str, context: &str) -> Result<T, IdeaflowError> {
        let outcome = self.parse_detailed(raw, None, Some(context));
        if outcome.is_fallback() {
            return Err(IdeaflowError::stage(context, "response contained no structured data"));
        }
        Ok(serde_json::from_value(outcome.value)?)
    }

    /// Returns a counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ParserStats {
        let mut stats = ParserStats::default();
        for kind in StrategyKind::ALL {
            let count = self.counters[kind.index()].load(Ordering::Relaxed);
            stats.total += count;
            if count > 0 {
                stats.by_strategy.insert(kind, count);
            }
        }
        stats
    }

    /// Resets every counter.
    pub fn reset_stats(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record(&self, kind: StrategyKind) {
        self.counters[kind.index()].fetch_add(1, Ordering::Relaxed);
    }
}
