//! Fix learning store commands.

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{Config, FixLearning};
use crate::services::{normalize_failure_pattern, KnowledgeGraph, SimilarPattern, StrategyScore};

#[derive(Args, Debug)]
pub struct LearningArgs {
    #[command(subcommand)]
    pub command: LearningCommands,
}

#[derive(Subcommand, Debug)]
pub enum LearningCommands {
    /// List every learned (failure pattern, strategy) pair
    List,
    /// Show the most reliable fix for a failure
    Best {
        #[command(flatten)]
        failure: FailureArg,
    },
    /// Show learned fixes for failures similar to this one
    Similar {
        #[command(flatten)]
        failure: FailureArg,
    },
    /// Rank strategies by success across all failures
    Top {
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// Export the knowledge graph
    Graph {
        #[arg(short, long, value_enum, default_value = "json")]
        format: GraphFormat,
    },
}

#[derive(Args, Debug)]
pub struct FailureArg {
    /// Failure pattern, or a raw error message with --error
    pub failure: String,

    /// Normalize FAILURE as a raw error message first
    #[arg(short, long)]
    pub error: bool,
}

impl FailureArg {
    fn pattern(&self) -> String {
        if self.error {
            normalize_failure_pattern(&self.failure)
        } else {
            self.failure.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GraphFormat {
    Json,
    Dot,
}

#[derive(Debug, Serialize)]
pub struct LearningRowOutput {
    pub failure_pattern: String,
    pub fix_strategy: String,
    pub times_tried: u32,
    pub times_succeeded: u32,
    pub success_rate: f64,
    pub last_used_at: String,
}

impl From<&FixLearning> for LearningRowOutput {
    fn from(learning: &FixLearning) -> Self {
        Self {
            failure_pattern: learning.failure_pattern.clone(),
            fix_strategy: learning.fix_strategy.to_string(),
            times_tried: learning.times_tried,
            times_succeeded: learning.times_succeeded,
            success_rate: learning.success_rate(),
            last_used_at: learning.last_used_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LearningListOutput {
    pub learnings: Vec<LearningRowOutput>,
    pub total: usize,
}

impl CommandOutput for LearningListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["pattern", "strategy", "tried", "fixed", "rate"]);
        for row in &self.learnings {
            table.add_row(vec![
                truncate(&row.failure_pattern, 50),
                row.fix_strategy.clone(),
                row.times_tried.to_string(),
                row.times_succeeded.to_string(),
                format!("{:.0}%", row.success_rate * 100.0),
            ]);
        }
        render_list("learning", &table, self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct BestFixOutput {
    pub failure_pattern: String,
    pub best: Option<LearningRowOutput>,
}

impl CommandOutput for BestFixOutput {
    fn to_human(&self) -> String {
        match &self.best {
            Some(best) => format!(
                "Best fix for '{}': {} ({}/{} succeeded)",
                self.failure_pattern, best.fix_strategy, best.times_succeeded, best.times_tried
            ),
            None => format!("No reliable fix learned for '{}'.", self.failure_pattern),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct SimilarOutput {
    pub failure_pattern: String,
    pub matches: Vec<SimilarPattern>,
}

impl CommandOutput for SimilarOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["similarity", "pattern", "strategy", "rate"]);
        for m in &self.matches {
            table.add_row(vec![
                format!("{:.2}", m.similarity),
                truncate(&m.learning.failure_pattern, 50),
                m.learning.fix_strategy.to_string(),
                format!("{:.0}%", m.learning.success_rate() * 100.0),
            ]);
        }
        render_list("similar pattern", &table, self.matches.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct TopStrategiesOutput {
    pub strategies: Vec<StrategyScore>,
}

impl CommandOutput for TopStrategiesOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["strategy", "tried", "fixed", "rate"]);
        for score in &self.strategies {
            table.add_row(vec![
                score.strategy.to_string(),
                score.times_tried.to_string(),
                score.times_succeeded.to_string(),
                format!("{:.0}%", score.success_rate * 100.0),
            ]);
        }
        render_list("strategy", &table, self.strategies.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct GraphOutput {
    pub graph: KnowledgeGraph,
}

impl CommandOutput for GraphOutput {
    fn to_human(&self) -> String {
        format!(
            "Knowledge graph: {} nodes, {} edges",
            self.graph.nodes.len(),
            self.graph.edges.len()
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: LearningArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let store = ctx.learning_store();

    match args.command {
        LearningCommands::List => {
            let learnings: Vec<LearningRowOutput> =
                store.list_all().await?.iter().map(LearningRowOutput::from).collect();
            let total = learnings.len();
            output(&LearningListOutput { learnings, total }, json_mode);
        }
        LearningCommands::Best { failure } => {
            let failure_pattern = failure.pattern();
            let best = store.best_fix(&failure_pattern).await?;
            let out = BestFixOutput {
                best: best.as_ref().map(LearningRowOutput::from),
                failure_pattern,
            };
            output(&out, json_mode);
        }
        LearningCommands::Similar { failure } => {
            let failure_pattern = failure.pattern();
            let matches = store.similar_patterns(&failure_pattern).await?;
            output(&SimilarOutput { failure_pattern, matches }, json_mode);
        }
        LearningCommands::Top { limit } => {
            let strategies = store.graph().await?.top_strategies(limit);
            output(&TopStrategiesOutput { strategies }, json_mode);
        }
        LearningCommands::Graph { format } => {
            let graph = store.graph().await?;
            match format {
                GraphFormat::Dot => println!("{}", graph.to_dot()),
                GraphFormat::Json => output(&GraphOutput { graph }, true),
            }
        }
    }

    Ok(())
}
