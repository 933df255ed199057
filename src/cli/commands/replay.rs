//! Replay command: drive one run against a scripted execution backend.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use super::run::RunReportOutput;
use crate::adapters::execution::ScriptedBackend;
use crate::cli::context::{load_script, AppContext};
use crate::cli::output::output;
use crate::domain::models::{CodeHandle, Config, StartOutcome, VerificationRequest};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Execution script (JSON) standing in for the test runner
    pub script: PathBuf,

    /// Handle of the code under test
    #[arg(short, long, default_value = "HEAD")]
    pub target: String,

    /// Acceptance criterion (repeatable)
    #[arg(short = 'C', long = "criterion")]
    pub criteria: Vec<String>,

    /// Reuse a fixed run ID; an existing run is reported, not restarted
    #[arg(long)]
    pub run_id: Option<Uuid>,
}

pub async fn execute(args: ReplayArgs, config: Config, json_mode: bool) -> Result<()> {
    let script = load_script(&args.script)?;
    let ctx = AppContext::open(config).await?;
    let orchestrator = ctx.orchestrator(ScriptedBackend::shared(script))?;

    let run_id = args.run_id.unwrap_or_else(Uuid::new_v4);
    let request = VerificationRequest::new(run_id, CodeHandle::new(args.target), args.criteria);
    if orchestrator.start_verification(request).await? == StartOutcome::AlreadyExists {
        info!(%run_id, "run exists, reporting stored state");
    }

    orchestrator.wait(run_id).await?;
    let report = orchestrator.get_report(run_id).await?;
    output(&RunReportOutput { report }, json_mode);
    Ok(())
}
