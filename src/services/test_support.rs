//! Evidence fixtures shared by the service tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::domain::models::{
    content_hash, ArtifactPayload, ArtifactRef, AssertionCounts, ClaimKind, ClaimedAction,
    EvidenceBundle, ExecutionKind, OutcomeSummary, ReportedStatus, ToolCallDirection,
};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn artifact(name: &str, payload: ArtifactPayload) -> ArtifactRef {
    let hash = content_hash(name.as_bytes());
    ArtifactRef {
        name: name.to_string(),
        storage_path: format!("mem://{hash}"),
        content_hash: hash,
        size_bytes: 64,
        captured_at: t0() + Duration::seconds(1),
        payload,
    }
}

pub(crate) fn test_log(name: &str, status: ReportedStatus) -> ArtifactRef {
    artifact(
        name,
        ArtifactPayload::Log {
            source: "test-runner".to_string(),
            line_count: 40,
            reported_status: Some(status),
        },
    )
}

pub(crate) fn test_trace(name: &str, exit_code: i32, counts: AssertionCounts) -> ArtifactRef {
    artifact(
        name,
        ArtifactPayload::Trace {
            command: "cargo test".to_string(),
            exit_code: Some(exit_code),
            tests: Some(counts),
            tool_refs: Vec::new(),
        },
    )
}

pub(crate) fn tool_call(call_id: &str, direction: ToolCallDirection) -> ArtifactRef {
    artifact(
        &format!("{call_id}-{direction:?}"),
        ArtifactPayload::ToolCall {
            call_id: call_id.to_string(),
            tool: "http_get".to_string(),
            direction,
        },
    )
}

pub(crate) fn outcome(passed: bool, duration_ms: u64, counts: AssertionCounts) -> OutcomeSummary {
    OutcomeSummary {
        passed,
        duration_ms,
        assertions: counts,
        coverage_percent: Some(81.0),
        explanation: None,
        error_message: None,
    }
}

pub(crate) fn bundle(
    run_id: Uuid,
    attempt: u32,
    artifacts: Vec<ArtifactRef>,
    claims: Vec<ClaimedAction>,
    outcome: OutcomeSummary,
) -> EvidenceBundle {
    EvidenceBundle::new(
        run_id,
        attempt,
        ExecutionKind::Programmatic,
        t0(),
        t0() + Duration::seconds(5),
        artifacts,
        claims,
        outcome,
    )
}

/// A passing test run whose log, trace and outcome all agree.
pub(crate) fn clean_bundle(run_id: Uuid, attempt: u32) -> EvidenceBundle {
    let counts = AssertionCounts::new(12, 12, 0);
    bundle(
        run_id,
        attempt,
        vec![
            test_trace(&format!("trace-{attempt}"), 0, counts),
            test_log(&format!("log-{attempt}"), ReportedStatus::Passed),
        ],
        vec![ClaimedAction::new(ClaimKind::RanTests, "ran the acceptance suite")],
        outcome(true, 2_500, counts),
    )
}
