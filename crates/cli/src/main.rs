//! Tandem CLI: the main entry point.
//!
//! Commands:
//! - `init`        Write a default settings file
//! - `config`      Load, validate and print agent settings
//! - `transcript`  Print a JSONL memory file as a readable transcript

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tandem", about = "Tandem: agent orchestration runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default settings file
    Init {
        /// Where to write the settings
        #[arg(default_value = "tandem.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a settings file and print the resolved values
    Config {
        #[arg(default_value = "tandem.toml")]
        path: PathBuf,

        /// Print the resolved settings as TOML
        #[arg(long)]
        toml: bool,
    },

    /// Print a stored conversation
    Transcript {
        /// JSONL memory file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { path, force } => commands::config_cmd::init(&path, force)?,
        Commands::Config { path, toml } => commands::config_cmd::show(&path, toml)?,
        Commands::Transcript { path } => commands::transcript::run(&path).await?,
    }

    Ok(())
}
