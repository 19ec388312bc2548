//! CLI Module
//!
//! Command-line interface for offline analysis and mixdown.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// takebooth - vocal recording studio engine
#[derive(Parser, Debug)]
#[command(name = "takebooth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate tempo and downbeat of a backing track (or every WAV in a directory)
    #[command(name = "analyze")]
    Analyze {
        /// WAV file or directory
        path: PathBuf,
    },

    /// Find where the voice starts in a vocal take
    #[command(name = "onset")]
    Onset {
        /// WAV file
        file: PathBuf,
    },

    /// Show how a vocal onset would be snapped to the beat grid
    #[command(name = "align")]
    Align {
        /// Tempo in BPM
        #[arg(long)]
        tempo: f64,

        /// Vocal onset in seconds
        #[arg(long)]
        onset: f64,

        /// Vocal duration in seconds (unbounded when omitted)
        #[arg(long)]
        vocal_duration: Option<f64>,
    },

    /// Bounce a backing track and a vocal take to a WAV file
    #[command(name = "mix")]
    Mix {
        /// Backing track
        #[arg(long)]
        beat: Option<PathBuf>,

        /// Vocal take
        #[arg(long)]
        vocal: Option<PathBuf>,

        /// Output WAV file
        #[arg(short, long)]
        out: PathBuf,

        /// Effect parameters (JSON)
        #[arg(long)]
        params: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed for the reverb impulse
        #[arg(long)]
        seed: Option<u64>,

        /// 16, 24 or 32 (float)
        #[arg(long)]
        bit_depth: Option<u16>,
    },
}
