use chrono::Utc;
use proptest::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

use verifix::adapters::sqlite::{create_migrated_test_pool, SqliteFixLearningRepository};
use verifix::domain::models::{
    FixLearning, FixStrategy, LearningQualifiers, Recommendation, RedFlag, RedFlagCategory,
    Severity, VerifierConfig,
};
use verifix::domain::ports::FixLearningRepository;
use verifix::services::fix_strategy_selector::pick_candidate;
use verifix::services::independent_verifier::recommend;
use verifix::services::normalize_failure_pattern;

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn strategy() -> impl Strategy<Value = FixStrategy> {
    (0..FixStrategy::ALL.len()).prop_map(|i| FixStrategy::ALL[i])
}

fn assert_counters(row: &FixLearning, tried: u32, succeeded: u32) -> Result<(), TestCaseError> {
    prop_assert_eq!(row.times_tried, tried);
    prop_assert_eq!(row.times_succeeded, succeeded);
    let expected = f64::from(succeeded) / f64::from(tried);
    prop_assert!((row.success_rate() - expected).abs() < 1e-9);
    Ok(())
}

/// Record `failures` failed outcomes and then one success, checking the
/// stored counters after every write.
async fn record_failures_then_success(
    failures: u32,
    pattern: &str,
    strategy: FixStrategy,
) -> Result<(), TestCaseError> {
    let pool = create_migrated_test_pool().await.expect("test pool");
    let repo = SqliteFixLearningRepository::new(pool);
    let none = LearningQualifiers::default();

    for i in 0..failures {
        let row = repo.record(pattern, strategy, false, &none).await.expect("record failure");
        assert_counters(&row, i + 1, 0)?;
    }
    let row = repo.record(pattern, strategy, true, &none).await.expect("record success");
    assert_counters(&row, failures + 1, 1)?;

    let stored = repo.get(pattern, strategy).await.expect("get").expect("row exists");
    assert_counters(&stored, failures + 1, 1)?;
    prop_assert_eq!(repo.list_all().await.expect("list").len(), 1);
    Ok(())
}

fn flag(severity: Severity) -> RedFlag {
    RedFlag::new(
        Uuid::nil(),
        1,
        severity,
        RedFlagCategory::InconsistentEvidence,
        "generated",
    )
}

proptest! {
    /// Property: a critical red flag always rejects, whatever the score
    #[test]
    fn prop_critical_flag_always_rejects(
        confidence in 0u8..=100,
        others in prop::collection::vec(severity(), 0..5),
        passed in any::<bool>(),
    ) {
        let mut flags: Vec<RedFlag> = others.into_iter().map(flag).collect();
        flags.push(flag(Severity::Critical));
        let recommendation = recommend(&VerifierConfig::default(), confidence, &flags, passed);
        prop_assert_eq!(recommendation, Recommendation::Reject);
    }

    /// Property: a failed outcome is never accepted
    #[test]
    fn prop_failed_outcome_never_accepted(
        confidence in 0u8..=100,
        severities in prop::collection::vec(severity(), 0..5),
    ) {
        let flags: Vec<RedFlag> = severities.into_iter().map(flag).collect();
        let recommendation = recommend(&VerifierConfig::default(), confidence, &flags, false);
        prop_assert_ne!(recommendation, Recommendation::Accept);
    }

    /// Property: success rate stays within [0, 1]
    #[test]
    fn prop_success_rate_is_bounded(tried in 0u32..1_000, succeeded in 0u32..1_000) {
        let learning = FixLearning {
            failure_pattern: "timeout after <num>ms".to_string(),
            fix_strategy: FixStrategy::TimeoutIncrease,
            times_tried: tried,
            times_succeeded: succeeded.min(tried),
            qualifiers: LearningQualifiers::default(),
            last_used_at: Utc::now(),
        };
        let rate = learning.success_rate();
        prop_assert!((0.0..=1.0).contains(&rate));
    }

    /// Property: N failures then one success leave tried = N + 1 and succeeded = 1
    #[test]
    fn prop_recorded_counters_track_every_outcome(
        failures in 0u32..20,
        pattern in "[a-z <>]{1,24}",
        fix in strategy(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(record_failures_then_success(failures, &pattern, fix))?;
    }

    /// Property: an excluded strategy is never picked
    #[test]
    fn prop_excluded_strategy_never_picked(
        candidates in prop::collection::vec(strategy(), 1..8),
        excluded in prop::collection::vec(strategy(), 0..8),
        level in 0usize..3,
    ) {
        let rank: HashMap<FixStrategy, f64> = HashMap::new();
        match pick_candidate(&candidates, &excluded, level, &rank) {
            Some(picked) => {
                prop_assert!(!excluded.contains(&picked));
                prop_assert!(candidates.contains(&picked));
            }
            None => prop_assert!(candidates.iter().all(|c| excluded.contains(c))),
        }
    }

    /// Property: normalized patterns carry no literal digits
    #[test]
    fn prop_normalized_pattern_has_no_digits(message in "[a-zA-Z0-9 ':./_-]{0,80}") {
        let pattern = normalize_failure_pattern(&message);
        prop_assert!(!pattern.chars().any(|c| c.is_ascii_digit()), "pattern {:?}", pattern);
    }
}
