//! Verifix CLI entry point.

use clap::Parser;
use tracing::debug;

use verifix::cli::commands::{config, learning, replay, run};
use verifix::cli::context::load_config;
use verifix::cli::{handle_error, Cli, Commands};
use verifix::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    // Held for the whole process so buffered file logs are flushed on exit.
    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };
    debug!(max_concurrent_runs = config.max_concurrent_runs, "configuration loaded");

    let result = match cli.command {
        Commands::Replay(args) => replay::execute(args, config, cli.json).await,
        Commands::Status(args) => run::status(args, config, cli.json).await,
        Commands::Report(args) => run::report(args, config, cli.json).await,
        Commands::Resume(args) => run::resume(args, config, cli.json).await,
        Commands::Learning(args) => learning::execute(args, config, cli.json).await,
        Commands::Config(args) => config::execute(args, config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
