//! adaptest CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "adaptest", version, about = "Adaptive multi-module test engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate test definition TOML files
    Validate {
        /// Path to a test definition file or directory
        #[arg(long)]
        definition: PathBuf,
    },

    /// Run a scripted attempt through the session engine
    Simulate {
        /// Path to a test definition file
        #[arg(long)]
        definition: PathBuf,

        /// Answers script (TOML, answers keyed by question id)
        #[arg(long)]
        script: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show the state of a locally stored attempt
    Inspect {
        /// Attempt id
        #[arg(long)]
        attempt: Uuid,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Push all local attempts to the remote store
    Sync {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example test definition
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adaptest=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { definition } => commands::validate::execute(definition),
        Commands::Simulate {
            definition,
            script,
            format,
        } => commands::simulate::execute(definition, script, format),
        Commands::Inspect { attempt, config } => commands::inspect::execute(attempt, config),
        Commands::Sync { config } => commands::sync::execute(config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
