//! Fix learning records: per (failure pattern, strategy) success statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::fix::FixStrategy;
use super::root_cause::Complexity;

/// Optional qualifiers attached to a learning row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningQualifiers {
    pub error_regex: Option<String>,
    pub file_pattern: Option<String>,
    pub complexity: Option<Complexity>,
}

impl LearningQualifiers {
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    pub fn with_error_regex(mut self, regex: impl Into<String>) -> Self {
        self.error_regex = Some(regex.into());
        self
    }
}

/// Persisted statistics for one (failure pattern, fix strategy) pair.
///
/// Only the counters are state; the success rate is always derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixLearning {
    pub failure_pattern: String,
    pub fix_strategy: FixStrategy,
    pub times_tried: u32,
    pub times_succeeded: u32,
    #[serde(default)]
    pub qualifiers: LearningQualifiers,
    pub last_used_at: DateTime<Utc>,
}

impl FixLearning {
    pub fn success_rate(&self) -> f64 {
        if self.times_tried == 0 {
            return 0.0;
        }
        f64::from(self.times_succeeded) / f64::from(self.times_tried)
    }

    /// Reliable entries qualify for reuse by the strategy selector.
    pub fn is_reliable(&self, threshold: f64, min_samples: u32) -> bool {
        self.times_tried >= min_samples && self.success_rate() > threshold
    }

    pub fn keywords(&self) -> BTreeSet<String> {
        pattern_keywords(&self.failure_pattern)
    }
}

/// Lowercased alphanumeric words of at least two characters, ignoring placeholders.
pub fn pattern_keywords(pattern: &str) -> BTreeSet<String> {
    pattern
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= 2)
        .filter(|w| !matches!(*w, "num" | "str" | "path" | "hex"))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two keyword sets.
pub fn keyword_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
