//! bibsync CLI
//!
//! Command-line tools for inspecting a bibsync store.
//!
//! # Commands
//!
//! - `inspect` - Display libraries, baselines and pending counts
//! - `pending` - List change markers awaiting submission
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// bibsync command-line store tools.
#[derive(Parser)]
#[command(name = "bibsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display libraries, version baselines and pending counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List change markers awaiting submission
    Pending {
        /// Only this library ("user" or "group:<id>")
        #[arg(short, long)]
        library: Option<String>,

        /// Show the write parameters the next sync would send
        #[arg(long)]
        parameters: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Pending {
            library,
            parameters,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            let library = library
                .as_deref()
                .map(commands::parse_library)
                .transpose()?;
            commands::pending::run(&path, library, parameters, &format)?;
        }
        Commands::Version => {
            println!("bibsync CLI v{}", env!("CARGO_PKG_VERSION"));
            let defaults = bibsync_sync_engine::SyncConfig::default();
            println!(
                "Sync defaults: {} workers, batches of {}, {} attempts",
                defaults.worker_count, defaults.batch_size, defaults.retry.max_attempts
            );
        }
    }

    Ok(())
}
