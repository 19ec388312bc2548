//! takebooth CLI - Vocal Recording Studio Engine
//!
//! Offline analysis and mixdown from the command line.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use takebooth::cli::commands::{self, MixOptions};
use takebooth::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("takebooth v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("takebooth v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Analyze { path } => commands::analyze(&path),
        Commands::Onset { file } => commands::onset(&file).map(|_| ()),
        Commands::Align {
            tempo,
            onset,
            vocal_duration,
        } => commands::align(tempo, onset, vocal_duration).map(|_| ()),
        Commands::Mix {
            beat,
            vocal,
            out,
            params,
            config,
            seed,
            bit_depth,
        } => commands::mix(&MixOptions {
            beat,
            vocal,
            out,
            params,
            config,
            seed,
            bit_depth,
        })
        .map(|_| ()),
    }
}
