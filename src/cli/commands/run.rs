//! Run inspection commands: status, report and resume.

use anyhow::Result;
use clap::Args;
use futures::future::join_all;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

use crate::adapters::execution::ScriptedBackend;
use crate::application::load_report;
use crate::cli::context::{load_script, AppContext};
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::{Config, RunReport, WorkflowState};
use crate::domain::ports::WorkflowStateRepository;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Run ID; lists recent runs when omitted
    pub run_id: Option<Uuid>,

    /// Maximum number of runs to list
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Only list runs that have not reached a terminal stage
    #[arg(long)]
    pub incomplete: bool,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Run ID
    pub run_id: Uuid,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Execution script that stands in for the backend
    #[arg(short, long)]
    pub script: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct RunRowOutput {
    pub run_id: String,
    pub stage: String,
    pub status: String,
    pub target: String,
    pub execution_attempts: u32,
    pub fix_attempts: u32,
    pub cost_units: f64,
    pub updated_at: String,
    pub reason: Option<String>,
}

impl From<&WorkflowState> for RunRowOutput {
    fn from(state: &WorkflowState) -> Self {
        Self {
            run_id: state.run_id.to_string(),
            stage: state.stage.to_string(),
            status: state.status.as_str().to_string(),
            target: state.target.to_string(),
            execution_attempts: state.execution_attempt,
            fix_attempts: state.retry_count,
            cost_units: state.cumulative_cost,
            updated_at: state.updated_at.to_rfc3339(),
            reason: state.reason.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunListOutput {
    pub runs: Vec<RunRowOutput>,
    pub total: usize,
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "stage", "status", "fixes", "cost", "updated"]);
        for run in &self.runs {
            table.add_row(vec![
                run.run_id[..8].to_string(),
                run.stage.clone(),
                run.status.clone(),
                run.fix_attempts.to_string(),
                format!("{:.2}", run.cost_units),
                run.updated_at.clone(),
            ]);
        }
        render_list("run", &table, self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunStatusOutput {
    pub state: WorkflowState,
}

impl CommandOutput for RunStatusOutput {
    fn to_human(&self) -> String {
        let state = &self.state;
        let mut lines = vec![
            format!("Run: {}", state.run_id),
            format!("Target: {}", state.target),
            format!("Stage: {} ({})", state.stage, state.status.as_str()),
            format!("Execution attempts: {}", state.execution_attempt),
            format!("Fix attempts: {}", state.retry_count),
            format!("Cost: {:.2}", state.cumulative_cost),
        ];
        if let Some(reason) = &state.reason {
            lines.push(format!("Reason: {reason}"));
        }
        if let Some(error) = &state.error {
            lines.push(format!("Error: {error}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunReportOutput {
    pub report: RunReport,
}

impl CommandOutput for RunReportOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut out = RunStatusOutput {
            state: report.state.clone(),
        }
        .to_human();

        let mut stages = list_table(&["stage", "attempt", "at", "summary"]);
        for snapshot in &report.state.stage_results {
            stages.add_row(vec![
                snapshot.stage.to_string(),
                snapshot.attempt.to_string(),
                snapshot.at.format("%H:%M:%S%.3f").to_string(),
                truncate(&snapshot.summary, 60),
            ]);
        }
        let _ = write!(out, "\n\nStages:\n{stages}");

        if let Some(bundle) = &report.latest_bundle {
            let outcome = bundle.outcome();
            let _ = write!(
                out,
                "\n\nEvidence (attempt {}): {} artifacts, {} claims, {}/{} assertions passed",
                bundle.attempt(),
                bundle.artifacts().len(),
                bundle.claims().len(),
                outcome.assertions.passed,
                outcome.assertions.total,
            );
        }

        if !report.red_flags.is_empty() {
            out.push_str("\n\nRed flags:");
            for flag in &report.red_flags {
                let _ = write!(
                    out,
                    "\n  [{}] {}: {}",
                    flag.severity.as_str(),
                    flag.category.as_str(),
                    flag.description
                );
            }
        }

        if let Some(verification) = &report.verification {
            let _ = write!(
                out,
                "\n\nVerification (attempt {}): {} with confidence {} by {}",
                verification.attempt,
                verification.recommendation.as_str(),
                verification.confidence,
                verification.reviewer_id,
            );
        }

        if let Some(rca) = &report.root_cause {
            let _ = write!(
                out,
                "\n\nRoot cause (attempt {}): {} / {}\n  {}\n  pattern: {}",
                rca.attempt,
                rca.category.as_str(),
                rca.complexity.as_str(),
                rca.root_cause,
                rca.failure_pattern,
            );
        }

        if !report.fix_attempts.is_empty() {
            let mut fixes = list_table(&["#", "tier", "model", "strategy", "result", "cost"]);
            for attempt in &report.fix_attempts {
                fixes.add_row(vec![
                    attempt.attempt_number.to_string(),
                    attempt.tier_name.clone(),
                    attempt.model.clone(),
                    attempt.strategy.to_string(),
                    if attempt.success { "fixed" } else { "failed" }.to_string(),
                    format!("{:.2}", attempt.cost_units),
                ]);
            }
            let _ = write!(out, "\n\nFix attempts:\n{fixes}");
        }

        out
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ResumeOutput {
    pub resumed: Vec<RunRowOutput>,
}

impl CommandOutput for ResumeOutput {
    fn to_human(&self) -> String {
        if self.resumed.is_empty() {
            return "No unfinished runs.".to_string();
        }
        let mut lines = vec![format!("Resumed {} run(s):", self.resumed.len())];
        for run in &self.resumed {
            lines.push(format!(
                "  {} -> {} {}",
                run.run_id,
                run.stage,
                run.reason.as_deref().unwrap_or("")
            ));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn status(args: StatusArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    if let Some(run_id) = args.run_id {
        let state = ctx
            .states
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))?;
        output(&RunStatusOutput { state }, json_mode);
        return Ok(());
    }

    let states = if args.incomplete {
        ctx.states.list_incomplete().await?
    } else {
        ctx.states.list_recent(args.limit).await?
    };
    let runs: Vec<RunRowOutput> = states.iter().take(args.limit).map(RunRowOutput::from).collect();
    let total = runs.len();
    output(&RunListOutput { runs, total }, json_mode);
    Ok(())
}

pub async fn report(args: ReportArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let report = load_report(ctx.states.as_ref(), ctx.records.as_ref(), args.run_id).await?;
    output(&RunReportOutput { report }, json_mode);
    Ok(())
}

/// Drive every unfinished run to a terminal stage.
pub async fn resume(args: ResumeArgs, config: Config, json_mode: bool) -> Result<()> {
    let script = load_script(&args.script)?;
    let ctx = AppContext::open(config).await?;
    let orchestrator = ctx.orchestrator(ScriptedBackend::shared(script))?;

    let run_ids = orchestrator.resume_incomplete().await?;
    let states = join_all(run_ids.iter().map(|run_id| orchestrator.wait(*run_id))).await;
    let resumed = states
        .into_iter()
        .map(|state| state.map(|s| RunRowOutput::from(&s)))
        .collect::<Result<Vec<_>, _>>()?;
    output(&ResumeOutput { resumed }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CodeHandle, Stage, VerificationRequest};

    fn state() -> WorkflowState {
        WorkflowState::new(&VerificationRequest::new(
            Uuid::new_v4(),
            CodeHandle::new("commit:abc"),
            vec!["tests pass".to_string()],
        ))
    }

    #[test]
    fn test_status_human_output_includes_reason() {
        let mut state = state();
        state.transition(Stage::Executing, "attempt 1").unwrap();
        state
            .terminate(Stage::Failed, "cancelled: operator request", None)
            .unwrap();
        let human = RunStatusOutput { state }.to_human();
        assert!(human.contains("Stage: failed (failed)"));
        assert!(human.contains("Reason: cancelled: operator request"));
    }

    #[test]
    fn test_report_json_is_the_report_itself() {
        let state = state();
        let run_id = state.run_id;
        let out = RunReportOutput {
            report: RunReport {
                state,
                latest_bundle: None,
                verification: None,
                red_flags: Vec::new(),
                root_cause: None,
                fix_attempts: Vec::new(),
            },
        };
        let json = out.to_json();
        assert_eq!(json["state"]["run_id"], run_id.to_string());
        assert!(json["fix_attempts"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_empty_run_list() {
        let out = RunListOutput { runs: Vec::new(), total: 0 };
        assert_eq!(out.to_human(), "No runs found.");
    }
}
