mod cli;
mod commands;

use crate::cli::{Commands, LintCli};
use analysis_state::{DataDirectory, get_or_create_settings};
use anyhow::Result;
use event_bus::EventBus;
use logging::LogMode;
use orchestrator::{AnalysisOrchestrator, OrchestratorConfig};
use server_manager::ProcessServerFactory;
use std::sync::Arc;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LintCli::parse_args();

    let data_directory = DataDirectory::new_system_default()?;
    let _guards = logging::init(LogMode::Cli, cli.verbose, &data_directory)?;
    let settings = get_or_create_settings(&data_directory);

    let factory = Arc::new(ProcessServerFactory::from_settings(&settings.server));
    let event_bus = Arc::new(EventBus::new());
    let mut config = OrchestratorConfig::from_settings(&settings);

    match cli.command {
        Commands::Analyze(args) => {
            let orchestrator = AnalysisOrchestrator::new(factory, event_bus, config);
            let result = interruptible(commands::analyze::run(&orchestrator, args)).await;
            orchestrator.shutdown().await;
            result
        }
        Commands::Rules(args) => {
            config.default_connection = commands::connection_for(args.project.as_deref(), &args.connection)?;
            let orchestrator = AnalysisOrchestrator::new(factory, event_bus, config);
            let result = interruptible(commands::rules::run(&orchestrator, args)).await;
            orchestrator.shutdown().await;
            result
        }
    }
}

/// Runs `command` until it finishes or the user presses Ctrl-C, so the
/// server can still be shut down on interrupt.
async fn interruptible(command: impl Future<Output = Result<()>>) -> Result<()> {
    tokio::select! {
        result = command => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down the analysis server");
            anyhow::bail!("interrupted")
        }
    }
}
