//! Pipeline services.
//!
//! Each service owns one step of the verification loop. Services are plain
//! structs over port traits; the orchestrator wires them together.

pub mod evidence_collector;
pub mod fix_learning_store;
pub mod fix_strategy_selector;
pub mod independent_verifier;
pub mod knowledge_graph;
pub mod red_flag_detector;
pub mod retry_manager;
pub mod root_cause_analyzer;

#[cfg(test)]
pub(crate) mod test_support;

pub use evidence_collector::EvidenceCollector;
pub use fix_learning_store::{FixLearningStore, SimilarPattern};
pub use fix_strategy_selector::{FixStrategySelector, SelectionSource, StrategySelection};
pub use independent_verifier::IndependentVerifier;
pub use knowledge_graph::{KnowledgeGraph, StrategyScore};
pub use red_flag_detector::RedFlagDetector;
pub use retry_manager::{RetryDecision, RetryManager, TierPlan};
pub use root_cause_analyzer::{normalize_failure_pattern, RootCauseAnalyzer};

use regex::Regex;

/// Compile one of the crate's built-in patterns.
///
/// A pattern that fails to compile disables its rule instead of panicking.
pub(crate) fn builtin_regex(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern, error = %e, "built-in pattern failed to compile");
            None
        }
    }
}

pub(crate) fn regex_matches(re: &Option<Regex>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_builtin_pattern_never_matches() {
        let re = builtin_regex("(unclosed");
        assert!(re.is_none());
        assert!(!regex_matches(&re, "(unclosed"));
    }

    #[test]
    fn test_builtin_pattern_matches() {
        let re = builtin_regex(r"\btimeout\b");
        assert!(regex_matches(&re, "request timeout after 30s"));
        assert!(!regex_matches(&re, "timeouts"));
    }
}
