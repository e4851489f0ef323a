//! Regime signals - main entry point
//!
//! This binary provides three subcommands:
//! - classify: Classify the market regime of a CSV series
//! - signals: Generate regime-conditioned signals for a CSV series
//! - replay: Walk forward over one or more series with outcome feedback

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "regime-signals")]
#[command(about = "Market regime classification, signal generation and outcome feedback", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the current market regime
    Classify {
        /// OHLCV CSV file (datetime,open,high,low,close,volume)
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol name (defaults to the file stem)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Detection method (volatility, trend, ma, combined)
        #[arg(short, long, default_value = "combined")]
        method: String,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate signals for the current regime
    Signals {
        /// OHLCV CSV file (datetime,open,high,low,close,volume)
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol name (defaults to the file stem)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Replay series bar by bar, tracking outcomes and re-tuning parameters
    Replay {
        /// OHLCV CSV files, one symbol each
        #[arg(short, long, num_args = 1.., required = true)]
        data: Vec<PathBuf>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Console stays clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        // JSON goes to stdout, so human-readable logs go to stderr
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Classify { .. } => ("classify", false),
        Commands::Signals { .. } => ("signals", false),
        Commands::Replay { .. } => ("replay", true),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Classify {
            data,
            symbol,
            method,
            config,
        } => commands::classify::run(data, symbol, method, config),

        Commands::Signals {
            data,
            symbol,
            config,
        } => commands::signals::run(data, symbol, config),

        Commands::Replay {
            data,
            config,
            sequential,
        } => commands::replay::run(data, config, sequential),
    }
}
