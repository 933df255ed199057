//! Red flag detection.
//!
//! Static, deterministic checks over an evidence bundle. Every check runs
//! independently and the result is the union of their findings; an empty
//! result means "nothing suspicious", never "verified".

use chrono::Duration;
use std::collections::{HashMap, HashSet};

use crate::domain::models::{
    ArtifactKind, ArtifactPayload, ArtifactRef, ClaimKind, DetectorConfig, EvidenceBundle,
    RedFlag, RedFlagCategory, ReportedStatus, Severity, ToolCallDirection,
};

pub struct RedFlagDetector {
    config: DetectorConfig,
}

impl RedFlagDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Run every check against `bundle`.
    ///
    /// `previous` is the bundle of the preceding attempt of the same run, used
    /// by the comparative checks (coverage regression, resubmitted evidence).
    pub fn detect(&self, bundle: &EvidenceBundle, previous: Option<&EvidenceBundle>) -> Vec<RedFlag> {
        let mut flags = Vec::new();
        flags.extend(self.check_missing_evidence(bundle));
        flags.extend(self.check_inconsistent_evidence(bundle));
        flags.extend(self.check_tool_calls(bundle));
        flags.extend(self.check_timing(bundle));
        if let Some(previous) = previous {
            flags.extend(self.check_against_previous(bundle, previous));
        }

        if flags.is_empty() {
            tracing::debug!(run_id = %bundle.run_id(), attempt = bundle.attempt(), "no red flags");
        } else {
            tracing::info!(
                run_id = %bundle.run_id(),
                attempt = bundle.attempt(),
                count = flags.len(),
                critical = flags.iter().filter(|f| f.is_critical()).count(),
                "red flags detected"
            );
        }
        flags
    }

    fn flag(
        &self,
        bundle: &EvidenceBundle,
        severity: Severity,
        category: RedFlagCategory,
        description: String,
    ) -> RedFlag {
        RedFlag::new(bundle.run_id(), bundle.attempt(), severity, category, description)
    }

    /// Claimed actions with no artifact that documents them.
    fn check_missing_evidence(&self, bundle: &EvidenceBundle) -> Vec<RedFlag> {
        let mut flags = Vec::new();

        for claim in bundle.claims() {
            let evidenced = match (&claim.kind, &claim.tool_call_id) {
                (ClaimKind::InvokedTool, Some(call_id)) => bundle
                    .artifacts()
                    .iter()
                    .any(|a| matches!(&a.payload, ArtifactPayload::ToolCall { call_id: id, .. } if id == call_id)),
                (kind, _) => bundle.artifacts().iter().any(|a| kind.is_evidenced_by(&a.payload)),
            };

            if !evidenced {
                flags.push(self.flag(
                    bundle,
                    Severity::Critical,
                    RedFlagCategory::MissingEvidence,
                    format!(
                        "claimed action '{}' ({}) has no corresponding artifact",
                        claim.description,
                        claim.kind.as_str()
                    ),
                ));
            }
        }

        flags
    }

    /// Artifacts that disagree with each other or with the reported outcome.
    fn check_inconsistent_evidence(&self, bundle: &EvidenceBundle) -> Vec<RedFlag> {
        let mut flags = Vec::new();
        let outcome = bundle.outcome();

        let logs: Vec<(&ArtifactRef, ReportedStatus)> = bundle
            .artifacts_of(ArtifactKind::Log)
            .filter_map(|a| match &a.payload {
                ArtifactPayload::Log {
                    reported_status: Some(status),
                    ..
                } => Some((a, *status)),
                _ => None,
            })
            .collect();

        for artifact in bundle.artifacts_of(ArtifactKind::Trace) {
            let ArtifactPayload::Trace { command, exit_code, tests, .. } = &artifact.payload else {
                continue;
            };
            let is_test_trace = tests.is_some() || command.to_lowercase().contains("test");

            if let (true, Some(code)) = (is_test_trace, exit_code) {
                let trace_status = if *code == 0 { ReportedStatus::Passed } else { ReportedStatus::Failed };
                for (log, status) in &logs {
                    if *status != trace_status {
                        flags.push(
                            self.flag(
                                bundle,
                                Severity::High,
                                RedFlagCategory::InconsistentEvidence,
                                format!(
                                    "log '{}' reports {:?} but trace '{}' exited with code {}",
                                    log.name, status, artifact.name, code
                                ),
                            )
                            .with_artifacts([log.content_hash.clone(), artifact.content_hash.clone()]),
                        );
                    }
                }
                if outcome.passed && *code != 0 {
                    flags.push(
                        self.flag(
                            bundle,
                            Severity::High,
                            RedFlagCategory::InconsistentEvidence,
                            format!("outcome reports pass but trace '{}' exited with code {}", artifact.name, code),
                        )
                        .with_artifacts([artifact.content_hash.clone()]),
                    );
                }
            }

            if let Some(counts) = tests {
                if !counts.is_consistent() {
                    flags.push(
                        self.flag(
                            bundle,
                            Severity::High,
                            RedFlagCategory::InconsistentEvidence,
                            format!(
                                "trace '{}' counts {} passed + {} failed but {} total",
                                artifact.name, counts.passed, counts.failed, counts.total
                            ),
                        )
                        .with_artifacts([artifact.content_hash.clone()]),
                    );
                }
                if outcome.passed && counts.failed > 0 {
                    flags.push(
                        self.flag(
                            bundle,
                            Severity::High,
                            RedFlagCategory::InconsistentEvidence,
                            format!(
                                "outcome reports pass but trace '{}' records {} failed tests",
                                artifact.name, counts.failed
                            ),
                        )
                        .with_artifacts([artifact.content_hash.clone()]),
                    );
                }
            }
        }

        for (log, status) in &logs {
            if outcome.passed && *status == ReportedStatus::Failed {
                flags.push(
                    self.flag(
                        bundle,
                        Severity::High,
                        RedFlagCategory::InconsistentEvidence,
                        format!("outcome reports pass but log '{}' reports failure", log.name),
                    )
                    .with_artifacts([log.content_hash.clone()]),
                );
            }
        }

        if !outcome.assertions.is_consistent() {
            let a = outcome.assertions;
            flags.push(self.flag(
                bundle,
                Severity::High,
                RedFlagCategory::InconsistentEvidence,
                format!(
                    "outcome counts {} passed + {} failed assertions but {} total",
                    a.passed, a.failed, a.total
                ),
            ));
        }

        flags.extend(self.check_reused_content(bundle));
        flags
    }

    /// The same bytes presented as evidence of different things.
    fn check_reused_content(&self, bundle: &EvidenceBundle) -> Vec<RedFlag> {
        let mut by_hash: HashMap<&str, Vec<&ArtifactRef>> = HashMap::new();
        for artifact in bundle.artifacts() {
            by_hash.entry(artifact.content_hash.as_str()).or_default().push(artifact);
        }

        let mut reused: Vec<_> = by_hash
            .into_iter()
            .filter(|(_, artifacts)| {
                let kinds: HashSet<ArtifactKind> = artifacts.iter().map(|a| a.kind()).collect();
                let steps: HashSet<Option<&str>> = artifacts.iter().map(|a| a.payload.step()).collect();
                kinds.len() > 1 || steps.len() > 1
            })
            .collect();
        reused.sort_by_key(|(hash, _)| *hash);

        reused
            .into_iter()
            .map(|(hash, artifacts)| {
                let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
                self.flag(
                    bundle,
                    Severity::High,
                    RedFlagCategory::InconsistentEvidence,
                    format!("identical content presented as distinct artifacts: {}", names.join(", ")),
                )
                .with_artifacts([hash])
            })
            .collect()
    }

    /// Tool invocations referenced by a trace must show both request and response.
    fn check_tool_calls(&self, bundle: &EvidenceBundle) -> Vec<RedFlag> {
        let mut seen: HashMap<&str, HashSet<ToolCallDirection>> = HashMap::new();
        for artifact in bundle.artifacts_of(ArtifactKind::ToolCall) {
            if let ArtifactPayload::ToolCall { call_id, direction, .. } = &artifact.payload {
                seen.entry(call_id.as_str()).or_default().insert(*direction);
            }
        }
        let has_pair = |id: &str| {
            seen.get(id).is_some_and(|d| {
                d.contains(&ToolCallDirection::Request) && d.contains(&ToolCallDirection::Response)
            })
        };

        let mut flags = Vec::new();
        for artifact in bundle.artifacts_of(ArtifactKind::Trace) {
            let ArtifactPayload::Trace { tool_refs, .. } = &artifact.payload else {
                continue;
            };
            for call_id in tool_refs.iter().filter(|id| !has_pair(id.as_str())) {
                flags.push(
                    self.flag(
                        bundle,
                        Severity::Critical,
                        RedFlagCategory::UnverifiedToolClaim,
                        format!(
                            "trace '{}' references tool call '{}' without a matching request/response pair",
                            artifact.name, call_id
                        ),
                    )
                    .with_artifacts([artifact.content_hash.clone()]),
                );
            }
        }

        // A claimed invocation whose call id only shows one side of the exchange.
        for claim in bundle.claims() {
            if let (ClaimKind::InvokedTool, Some(call_id)) = (&claim.kind, &claim.tool_call_id) {
                if seen.contains_key(call_id.as_str()) && !has_pair(call_id.as_str()) {
                    flags.push(self.flag(
                        bundle,
                        Severity::Critical,
                        RedFlagCategory::UnverifiedToolClaim,
                        format!(
                            "claimed tool call '{}' has no matching request/response pair",
                            call_id
                        ),
                    ));
                }
            }
        }

        flags
    }

    fn check_timing(&self, bundle: &EvidenceBundle) -> Vec<RedFlag> {
        let mut flags = Vec::new();
        let outcome = bundle.outcome();

        let claims_tests = bundle.claims().iter().any(|c| c.kind == ClaimKind::RanTests);
        if (claims_tests || outcome.assertions.total > 0)
            && outcome.duration_ms < self.config.min_suite_duration_ms
        {
            flags.push(self.flag(
                bundle,
                Severity::Medium,
                RedFlagCategory::TimingAnomaly,
                format!(
                    "test suite reported {} ms, below the {} ms floor for a real run",
                    outcome.duration_ms, self.config.min_suite_duration_ms
                ),
            ));
        }

        if bundle.finished_at() < bundle.started_at() {
            flags.push(self.flag(
                bundle,
                Severity::Medium,
                RedFlagCategory::TimingAnomaly,
                "execution finished before it started".to_string(),
            ));
            return flags;
        }

        let skew = Duration::milliseconds(self.config.timestamp_skew_ms as i64);
        let window = bundle
            .started_at()
            .checked_sub_signed(skew)
            .zip(bundle.finished_at().checked_add_signed(skew));
        let Some((window_start, window_end)) = window else {
            flags.push(self.flag(
                bundle,
                Severity::Medium,
                RedFlagCategory::TimingAnomaly,
                "execution window timestamps are out of range".to_string(),
            ));
            return flags;
        };
        let outside: Vec<&ArtifactRef> = bundle
            .artifacts()
            .iter()
            .filter(|a| a.captured_at < window_start || a.captured_at > window_end)
            .collect();
        if !outside.is_empty() {
            let names: Vec<&str> = outside.iter().map(|a| a.name.as_str()).collect();
            flags.push(
                self.flag(
                    bundle,
                    Severity::Medium,
                    RedFlagCategory::TimingAnomaly,
                    format!("artifacts captured outside the execution window: {}", names.join(", ")),
                )
                .with_artifacts(outside.iter().map(|a| a.content_hash.clone())),
            );
        }

        flags
    }

    fn check_against_previous(&self, bundle: &EvidenceBundle, previous: &EvidenceBundle) -> Vec<RedFlag> {
        let mut flags = Vec::new();
        let current = bundle.outcome();
        let before = previous.outcome();
        let explained = current
            .explanation
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());

        if !explained {
            if let (Some(now), Some(then)) = (current.coverage_percent, before.coverage_percent) {
                if then - now > self.config.coverage_tolerance_percent {
                    flags.push(self.flag(
                        bundle,
                        Severity::High,
                        RedFlagCategory::CoverageRegression,
                        format!(
                            "coverage dropped from {then:.1}% to {now:.1}% since attempt {} without explanation",
                            previous.attempt()
                        ),
                    ));
                }
            }
            if current.assertions.total < before.assertions.total {
                flags.push(self.flag(
                    bundle,
                    Severity::High,
                    RedFlagCategory::CoverageRegression,
                    format!(
                        "assertion count dropped from {} to {} since attempt {} without explanation",
                        before.assertions.total,
                        current.assertions.total,
                        previous.attempt()
                    ),
                ));
            }
        }

        let hashes = bundle.content_hashes();
        if !hashes.is_empty() && hashes == previous.content_hashes() {
            flags.push(
                self.flag(
                    bundle,
                    Severity::High,
                    RedFlagCategory::InconsistentEvidence,
                    format!(
                        "evidence is byte-identical to attempt {}; nothing was re-executed",
                        previous.attempt()
                    ),
                )
                .with_artifacts(hashes.iter().map(|h| h.to_string())),
            );
        }

        flags
    }
}
