//! Rule-based root cause analysis.
//!
//! Classifies a failing attempt from its error text, or from its red flags
//! when the attempt produced no error text, and derives the normalized
//! failure signature the learning store is keyed on.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use uuid::Uuid;

use super::{builtin_regex, regex_matches};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    failed_strategies, Complexity, FailureCategory, FixStrategy, RedFlag, RedFlagCategory,
    RootCauseAnalysis,
};
use crate::domain::ports::{DiagnosisInput, RootCauseDiagnoser};

const MAX_PATTERN_CHARS: usize = 200;
const MAX_EXCERPT_CHARS: usize = 500;

struct Rule {
    category: FailureCategory,
    strategy: FixStrategy,
    regex: Regex,
}

/// Classification rules, first match wins.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use FailureCategory::*;
    use FixStrategy::*;

    [
        (Syntax, SyntaxFix, r"syntaxerror|syntax error|unexpected token|parse error|unterminated|unexpected end of (?:input|file)|invalid syntax"),
        (Syntax, TypeFix, r"mismatched types|is not assignable to|type ?error: (?:cannot assign|expected)|cannot find type|expected type"),
        (Integration, ImportFix, r"cannot find module|module not found|no module named|unresolved import|importerror|failed to resolve import"),
        (Integration, ApiUpdate, r"is not a function|has no attribute|undefined method|no method named|deprecated|status code 4\d\d|404 not found|unexpected response"),
        (Integration, ConfigFix, r"connection refused|econnrefused|econnreset|service unavailable|bad gateway"),
        (Environment, TimeoutIncrease, r"timed? ?out|timeout|deadline exceeded"),
        (Environment, DependencyAdd, r"command not found|not installed|missing dependency|could not resolve dependency"),
        (Environment, EnvSetup, r"environment variable|env var|enoent|permission denied|eacces|eaddrinuse|address already in use|out of memory|no space left"),
        (Logic, EdgeCaseFix, r"\bnull\b|\bundefined\b|\bnil\b|index out of|out of bounds|overflow|division by zero|\bempty\b"),
        (Logic, LogicFix, r"assert|expected .* (?:but|got|to equal|received)|mismatch|incorrect|wrong"),
    ]
    .into_iter()
    .filter_map(|(category, strategy, pattern)| {
        builtin_regex(&format!("(?i){pattern}")).map(|regex| Rule {
            category,
            strategy,
            regex,
        })
    })
    .collect()
});

static HARD_PROBLEM: LazyLock<Option<Regex>> = LazyLock::new(|| {
    builtin_regex(r"(?i)race condition|deadlock|concurren|architect|circular dependency|memory leak|flaky|intermittent")
});

static QUOTED: LazyLock<Option<Regex>> =
    LazyLock::new(|| builtin_regex(r#""[^"]*"|'[^']*'|`[^`]*`"#));
static PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| builtin_regex(r"(?:[a-z]:)?(?:[\w.@-]*[/\\])+[\w.@-]+"));
static HEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| builtin_regex(r"\b0x[0-9a-f]+\b|\b[0-9a-f]*[a-f][0-9a-f]*[0-9][0-9a-f]*\b|\b[0-9a-f]*[0-9][0-9a-f]*[a-f][0-9a-f]*\b"));
static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| builtin_regex(r"\d+(?:\.\d+)?"));
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| builtin_regex(r"\s+"));
static FILE_REF: LazyLock<Option<Regex>> = LazyLock::new(|| {
    builtin_regex(r"(?i)[\w-]+\.(rs|ts|tsx|js|jsx|mjs|py|go|java|kt|rb|php|cs|json|ya?ml|toml|css|html)\b")
});

fn replace_all(re: &Option<Regex>, text: &str, with: &str) -> String {
    match re {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Reduce an error message to a stable signature.
///
/// Quoted strings, paths, hex values and numbers are replaced by placeholders
/// so the same failure in different runs maps to the same learning key.
pub fn normalize_failure_pattern(error: &str) -> String {
    let first_line = error.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut pattern = first_line.to_lowercase();
    pattern = replace_all(&QUOTED, &pattern, "<str>");
    pattern = replace_all(&PATH, &pattern, "<path>");
    pattern = replace_all(&HEX, &pattern, "<hex>");
    pattern = replace_all(&NUMBER, &pattern, "<num>");
    pattern = replace_all(&WHITESPACE, &pattern, " ");
    truncate_chars(pattern.trim(), MAX_PATTERN_CHARS)
}

/// A case-insensitive regex matching raw errors with the given signature.
pub fn pattern_regex(failure_pattern: &str) -> String {
    let escaped = regex::escape(failure_pattern)
        .replace("<str>", r#"["'`].*?["'`]"#)
        .replace("<path>", r"\S+")
        .replace("<hex>", r"[0-9a-fx]+")
        .replace("<num>", r"\d+(?:\.\d+)?");
    format!("(?i){escaped}")
}

/// `*.ext` of the first source file mentioned in `text`.
pub fn file_pattern(text: &str) -> Option<String> {
    let re = FILE_REF.as_ref()?;
    let caps = re.captures(text)?;
    Some(format!("*.{}", caps.get(1)?.as_str().to_lowercase()))
}

fn distinct_file_refs(text: &str) -> usize {
    FILE_REF.as_ref().map_or(0, |re| {
        re.find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect::<BTreeSet<_>>()
            .len()
    })
}

fn category_for_flag(category: RedFlagCategory) -> FailureCategory {
    match category {
        RedFlagCategory::MissingEvidence | RedFlagCategory::TimingAnomaly => FailureCategory::Environment,
        RedFlagCategory::UnverifiedToolClaim => FailureCategory::Integration,
        RedFlagCategory::InconsistentEvidence | RedFlagCategory::CoverageRegression => FailureCategory::Logic,
    }
}

fn worst_flag(flags: &[RedFlag]) -> Option<&RedFlag> {
    flags.iter().max_by_key(|f| f.severity)
}

/// Diagnoser that classifies failures with fixed pattern rules.
#[derive(Debug, Default, Clone)]
pub struct RootCauseAnalyzer;

impl RootCauseAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// The most specific error text available for the attempt.
    fn primary_error(input: &DiagnosisInput<'_>) -> Option<String> {
        if let Some(error) = input.execution_error.filter(|e| !e.trim().is_empty()) {
            return Some(error.to_string());
        }
        if let Some(error) = input
            .bundle
            .and_then(|b| b.outcome().error_message.as_deref())
            .filter(|e| !e.trim().is_empty())
        {
            return Some(error.to_string());
        }
        None
    }

    fn estimate_complexity(base: Complexity, text: &str, previous_failures: usize) -> Complexity {
        let mut complexity = base;
        if regex_matches(&HARD_PROBLEM, text) {
            return Complexity::Complex;
        }
        if distinct_file_refs(text) >= 3 {
            complexity = complexity.max(Complexity::Moderate);
        }
        if previous_failures >= 2 {
            complexity = complexity.max(Complexity::Moderate);
        }
        complexity
    }

    pub fn analyze(&self, input: DiagnosisInput<'_>) -> RootCauseAnalysis {
        let failed = failed_strategies(input.history);
        let primary = Self::primary_error(&input);

        let (category, rule_strategy, signature_source) = match &primary {
            Some(error) => match RULES.iter().find(|r| r.regex.is_match(error)) {
                Some(rule) => (rule.category, Some(rule.strategy), error.clone()),
                None => (FailureCategory::Logic, None, error.clone()),
            },
            None => match worst_flag(input.flags) {
                Some(flag) => (
                    category_for_flag(flag.category),
                    None,
                    format!("{}: {}", flag.category.as_str(), flag.description),
                ),
                None => {
                    let confidence = input.report.map_or(0, |r| r.confidence);
                    (
                        FailureCategory::Logic,
                        None,
                        format!("verification rejected with confidence {confidence}"),
                    )
                }
            },
        };

        let base = match category {
            FailureCategory::Logic => Complexity::Moderate,
            _ => Complexity::Simple,
        };
        let failures_so_far = input.history.iter().filter(|a| !a.success).count();
        let complexity = Self::estimate_complexity(base, &signature_source, failures_so_far);

        let recommended_strategy = rule_strategy.filter(|s| !failed.contains(s));
        let excerpt = truncate_chars(&signature_source, MAX_EXCERPT_CHARS);

        RootCauseAnalysis {
            id: Uuid::new_v4(),
            run_id: input.run_id,
            attempt: input.attempt,
            category,
            root_cause: format!("{} failure: {}", category.as_str(), excerpt),
            recommended_strategy,
            complexity,
            failure_pattern: normalize_failure_pattern(&signature_source),
            error_excerpt: primary.map(|e| truncate_chars(&e, MAX_EXCERPT_CHARS)),
            file_pattern: file_pattern(&signature_source),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl RootCauseDiagnoser for RootCauseAnalyzer {
    async fn diagnose(&self, input: DiagnosisInput<'_>) -> DomainResult<RootCauseAnalysis> {
        let analysis = self.analyze(input);
        tracing::info!(
            run_id = %analysis.run_id,
            attempt = analysis.attempt,
            category = analysis.category.as_str(),
            complexity = analysis.complexity.as_str(),
            pattern = %analysis.failure_pattern,
            "root cause diagnosed"
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FixAttempt, Severity};

    fn input<'a>(error: Option<&'a str>, flags: &'a [RedFlag], history: &'a [FixAttempt]) -> DiagnosisInput<'a> {
        DiagnosisInput {
            run_id: Uuid::new_v4(),
            attempt: 1,
            bundle: None,
            flags,
            report: None,
            history,
            execution_error: error,
        }
    }

    fn failed_attempt(n: u32, strategy: FixStrategy) -> FixAttempt {
        FixAttempt {
            run_id: Uuid::new_v4(),
            attempt_number: n,
            tier_index: 0,
            tier_name: "cheap".to_string(),
            model: "haiku".to_string(),
            strategy,
            failure_pattern: "p".to_string(),
            success: false,
            cost_units: 1.0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_replaces_volatile_parts() {
        assert_eq!(
            normalize_failure_pattern("Timeout of 2000ms exceeded in /src/app/login.test.ts"),
            "timeout of <num>ms exceeded in <path>"
        );
        assert_eq!(
            normalize_failure_pattern("Cannot find module 'lodash'\n    at require (node:internal)"),
            "cannot find module <str>"
        );
        assert_eq!(
            normalize_failure_pattern("Segfault at 0x7ffe3c2a   in worker 12"),
            "segfault at <hex> in worker <num>"
        );
    }

    #[test]
    fn test_same_failure_different_values_share_pattern() {
        let a = normalize_failure_pattern("expected 42 but got 41 in 'total'");
        let b = normalize_failure_pattern("Expected 7 but got 9 in 'count'");
        assert_eq!(a, b);
    }

    #[test]
    fn test_pattern_regex_matches_raw_error() {
        let raw = "Timeout of 2000ms exceeded in /src/app/login.test.ts";
        let re = Regex::new(&pattern_regex(&normalize_failure_pattern(raw))).unwrap();
        assert!(re.is_match(raw));
        assert!(re.is_match("timeout of 15ms exceeded in ./x.ts"));
    }

    #[test]
    fn test_import_error_is_integration() {
        let analysis = RootCauseAnalyzer::new().analyze(input(
            Some("Error: Cannot find module 'date-fns' imported from src/util.ts:12"),
            &[],
            &[],
        ));
        assert_eq!(analysis.category, FailureCategory::Integration);
        assert_eq!(analysis.recommended_strategy, Some(FixStrategy::ImportFix));
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.file_pattern.as_deref(), Some("*.ts"));
        assert!(analysis.error_excerpt.is_some());
    }

    #[test]
    fn test_assertion_failure_is_logic() {
        let analysis = RootCauseAnalyzer::new().analyze(input(
            Some("AssertionError: expected 3 to equal 4"),
            &[],
            &[],
        ));
        assert_eq!(analysis.category, FailureCategory::Logic);
        assert_eq!(analysis.recommended_strategy, Some(FixStrategy::LogicFix));
        assert_eq!(analysis.complexity, Complexity::Moderate);
    }

    #[test]
    fn test_failed_strategy_is_not_recommended_again() {
        let history = [failed_attempt(1, FixStrategy::TimeoutIncrease)];
        let analysis = RootCauseAnalyzer::new().analyze(input(
            Some("Request timed out after 30s"),
            &[],
            &history,
        ));
        assert_eq!(analysis.category, FailureCategory::Environment);
        assert_eq!(analysis.recommended_strategy, None);
    }

    #[test]
    fn test_flags_only_failure_uses_worst_flag() {
        let run_id = Uuid::new_v4();
        let flags = [
            RedFlag::new(run_id, 1, Severity::Medium, RedFlagCategory::TimingAnomaly, "too fast"),
            RedFlag::new(
                run_id,
                1,
                Severity::Critical,
                RedFlagCategory::UnverifiedToolClaim,
                "tool call 'c1' without response",
            ),
        ];
        let analysis = RootCauseAnalyzer::new().analyze(input(None, &flags, &[]));

        assert_eq!(analysis.category, FailureCategory::Integration);
        assert_eq!(analysis.error_excerpt, None);
        assert!(analysis.failure_pattern.starts_with("unverified_tool_claim"));
    }

    #[test]
    fn test_complexity_rises_with_history_and_hard_problems() {
        let history = [
            failed_attempt(1, FixStrategy::SyntaxFix),
            failed_attempt(2, FixStrategy::TypeFix),
        ];
        let analysis = RootCauseAnalyzer::new().analyze(input(
            Some("SyntaxError: Unexpected token '}'"),
            &[],
            &history,
        ));
        assert_eq!(analysis.complexity, Complexity::Moderate);

        let analysis = RootCauseAnalyzer::new().analyze(input(
            Some("deadlock detected while awaiting lock in pool"),
            &[],
            &[],
        ));
        assert_eq!(analysis.complexity, Complexity::Complex);
    }
}
