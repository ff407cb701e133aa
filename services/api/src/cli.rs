use crate::evaluate::{run_evaluate, EvaluateArgs};
use crate::report::{run_report, ReportArgs};
use crate::server;
use campaign_engine::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Campaign Engine",
    about = "Serve and inspect agent campaign evaluations from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Evaluate campaigns for one user against a fixture catalogue
    Evaluate(EvaluateArgs),
    /// Export campaign requirements as CSV
    Report(ReportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON catalogue fixture (defaults to the bundled demo catalogue)
    #[arg(long)]
    pub(crate) fixtures: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Evaluate(args) => run_evaluate(args).await,
        Command::Report(args) => run_report(args),
    }
}
