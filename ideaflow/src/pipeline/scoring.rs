//! Quality scoring seam used by the validation stage.

use std::collections::HashSet;

/// Scores the combined text of a deliverable.
///
/// Scores are on a 0 to 100 scale and carry no calibrated meaning; they only
/// feed the acceptance threshold.
#[cfg_attr(test, mockall::automock)]
pub trait QualityScorer: Send + Sync {
    /// Returns a score in `[0, 100]`.
    fn score(&self, text: &str) -> f64;
}

impl std::fmt::Debug for dyn QualityScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn QualityScorer")
    }
}

/// Deterministic heuristic rewarding volume, vocabulary and structure.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicScorer {
    /// Word count that earns the full volume share.
    pub target_words: usize,
    /// Distinct words that earn the full vocabulary share.
    pub target_vocabulary: usize,
    /// Non-empty lines that earn the full structure share.
    pub target_lines: usize,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            target_words: 300,
            target_vocabulary: 150,
            target_lines: 20,
        }
    }
}

impl QualityScorer for HeuristicScorer {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, text: &str) -> f64 {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return 0.0;
        }

        let vocabulary: HashSet<&str> = words.iter().map(String::as_str).collect();
        let lines = text.lines().filter(|l| !l.trim().is_empty()).count();

        let share = |have: usize, want: usize| (have as f64 / want.max(1) as f64).min(1.0);
        let score = 40.0 * share(words.len(), self.target_words)
            + 30.0 * share(vocabulary.len(), self.target_vocabulary)
            + 30.0 * share(lines, self.target_lines);
        (score * 10.0).round() / 10.0
    }
}
