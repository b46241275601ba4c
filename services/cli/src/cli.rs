use crate::commands::{self, DecisionArgs, EvaluateArgs, ExtractArgs, RejectArgs};
use crate::server;
use analytica::config::AppConfig;
use analytica::error::AppError;
use analytica::telemetry;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "analytica",
    about = "Extract, validate and load municipal housing and economic data",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the review API (default command)
    Serve(ServeArgs),
    /// Read a CSV export, stage it as a pending batch and score it
    Extract(ExtractArgs),
    /// List batches awaiting a decision
    Pending,
    /// Score a pending batch and auto-approve it when it clears the threshold
    Evaluate(EvaluateArgs),
    /// Approve a pending batch for loading
    Approve(DecisionArgs),
    /// Reject a pending batch; a reason is required
    Reject(RejectArgs),
    /// Merge every approved batch into the analytical store
    Load,
    /// Show batch counts per area and row counts per destination table
    Status,
    /// Show every recorded decision, oldest first
    History,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let result = match command {
        Command::Serve(args) => server::run(config, args).await,
        Command::Extract(args) => commands::extract(&config, args),
        Command::Pending => commands::pending(&config),
        Command::Evaluate(args) => commands::evaluate(&config, args),
        Command::Approve(args) => commands::approve(&config, args),
        Command::Reject(args) => commands::reject(&config, args),
        Command::Load => commands::load(&config),
        Command::Status => commands::status(&config),
        Command::History => commands::history(&config),
    };

    if let Err(err) = &result {
        tracing::error!(
            kind = err.kind().label(),
            batch_id = err.batch_id().map(|id| id.as_str()),
            retryable = err.kind().is_retryable(),
            "command failed: {err}"
        );
    }
    result
}
