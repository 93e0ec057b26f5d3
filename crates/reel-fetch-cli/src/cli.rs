//! Command-line definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reel-fetch")]
#[command(about = "Search torrent indexes and download magnets")]
#[command(version)]
pub struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true, env = "REEL_FETCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the download directory for this invocation
    #[arg(long = "download-dir", global = true)]
    pub download_dir: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search the configured index for magnets
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Download a magnet and follow it until it completes
    Get {
        magnet: String,
        /// Title to show instead of the magnet's display name
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Print the effective settings
    ListConfig,
}
