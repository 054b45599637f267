use clap::{Parser, Subcommand};
use dcim_core::{Quality, Resolution};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dcim-converter")]
#[command(author, version, about = "Convert camera videos to iPhone-compatible MP4")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append log messages to this file (overrides logging.file)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a folder and convert every video found
    Convert {
        /// Folder to scan (defaults to paths.source)
        source: Option<PathBuf>,

        /// Folder to write MP4 files into (defaults to paths.output)
        output: Option<PathBuf>,

        /// Encoder quality: high, medium or low
        #[arg(short, long)]
        quality: Option<Quality>,

        /// Largest output size as WxH, or "original" to keep the source size
        #[arg(long, value_parser = parse_resolution_cap)]
        max_resolution: Option<Cap>,

        /// Maximum scan worker threads
        #[arg(long)]
        threads: Option<usize>,

        /// Per-file conversion timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Convert even when the output file already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// List the videos a conversion would pick up
    Scan {
        /// Folder to scan (defaults to paths.source)
        source: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe a video file and display its metadata
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// Parsed `--max-resolution`; `None` inside means "original".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cap(pub Option<Resolution>);

fn parse_resolution_cap(s: &str) -> Result<Cap, String> {
    Resolution::parse_cap(s).map(Cap)
}
