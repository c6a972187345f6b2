use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ide-lint",
    version,
    about = "IDE lint client",
    long_about = "Runs the background analysis server on a set of files and reports the issues it finds."
)]
pub struct LintCli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl LintCli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze files and print the issues found
    Analyze(AnalyzeArgs),
    /// Show the metadata of a rule
    Rules(RulesArgs),
}

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// URL of the lint host the server connects to
    #[arg(long)]
    pub host_url: Option<String>,

    /// Project key on the lint host
    #[arg(long)]
    pub project_key: Option<String>,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Files to analyze
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Project file whose ide-lint.project.json supplies the base directory
    /// and connection
    #[arg(long, conflicts_with = "base_dir")]
    pub project: Option<PathBuf>,

    /// Only files under this directory are analyzed (default: current directory)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct RulesArgs {
    /// Rule key, for example `pas:S1234`
    pub key: String,

    /// Project file whose ide-lint.project.json supplies the connection
    #[arg(long)]
    pub project: Option<PathBuf>,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}
