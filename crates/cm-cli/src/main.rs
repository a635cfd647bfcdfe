//! CM2 CLI
//!
//! Single binary for the conversational CAD client:
//! - Interactive chat sessions against a generation backend
//! - Benchmark runs of prompts against reference procedures
//! - Health and configuration management

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cm2::commands::{self, BenchOptions};

#[derive(Parser)]
#[command(name = "cm2")]
#[command(author, version, about = "Conversational CAD client")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config)
    #[arg(short, long, global = true, env = "CM2_SERVER")]
    server: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive design session
    Chat,

    /// Run benchmark cases against the backend
    Bench {
        /// TOML file with [[cases]] (defaults to config, then built-in cases)
        #[arg(long)]
        cases: Option<PathBuf>,
        /// Run only the case with this id
        #[arg(long)]
        case: Option<String>,
        /// Run reference procedures instead of prompts
        #[arg(long)]
        ground_truth: bool,
        /// Write results as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show backend health
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Create a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Path => commands::config_path(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force),
        },
        Commands::Status => {
            let config = commands::load_config(config_path, cli.server.as_deref())?;
            commands::status_command(&config).await
        }
        Commands::Chat => {
            let config = commands::load_config(config_path, cli.server.as_deref())?;
            commands::chat_command(&config).await
        }
        Commands::Bench {
            cases,
            case,
            ground_truth,
            output,
        } => {
            let config = commands::load_config(config_path, cli.server.as_deref())?;
            commands::bench_command(
                &config,
                BenchOptions {
                    cases,
                    case,
                    ground_truth,
                    output,
                },
            )
            .await
        }
    }
}
