use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use fundsync::core::ChartPeriod;
use fundsync::core::log::init_logging;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fundsync::AppCommand {
    fn from(cmd: Commands) -> fundsync::AppCommand {
        match cmd {
            Commands::Add {
                code,
                name,
                category,
                risk,
                inception,
            } => fundsync::AppCommand::Add {
                code,
                name,
                category,
                risk,
                inception,
            },
            Commands::Remove { code } => fundsync::AppCommand::Remove { code },
            Commands::List => fundsync::AppCommand::List,
            Commands::Sync { code, force } => fundsync::AppCommand::Sync { code, force },
            Commands::Status { code } => fundsync::AppCommand::Status { code },
            Commands::Chart { code, period, rows } => {
                fundsync::AppCommand::Chart { code, period, rows }
            }
            Commands::Daemon => fundsync::AppCommand::Daemon,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Start tracking a fund and fetch its history
    Add {
        /// Six digit fund code
        code: String,
        /// Display name; looked up from the provider when omitted
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        risk: Option<String>,
        /// First valuation date (YYYY-MM-DD)
        #[arg(long)]
        inception: Option<NaiveDate>,
    },
    /// Stop tracking a fund and delete its cached history
    Remove { code: String },
    /// List tracked funds
    List,
    /// Fetch new valuations for one fund, or all of them
    Sync {
        code: Option<String>,
        /// Refetch the full history instead of only the missing tail
        #[arg(short, long)]
        force: bool,
    },
    /// Show per-fund sync status
    Status { code: Option<String> },
    /// Show cached valuations with indicators
    Chart {
        code: String,
        /// One of 1m, 3m, 6m, 1y, 3y, 5y, all
        #[arg(short, long, default_value = "1y")]
        period: ChartPeriod,
        /// Number of most recent rows to print
        #[arg(short, long, default_value_t = 20)]
        rows: usize,
    },
    /// Sync on the configured daily checkpoints until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, matches!(cli.command, Some(Commands::Daemon)));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            on_signal.cancel();
        }
    });

    let result = match cli.command {
        Some(Commands::Setup) => fundsync::cli::setup::setup(),
        Some(cmd) => fundsync::run_command(cmd.into(), cli.config_path.as_deref(), cancel).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
