//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keep live values, executable blocks and backlinks in markdown up to date
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Root directory (default: current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file path, relative to root (default: search for codebook.toml)
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Override the value backend URL
    #[arg(long = "backend-url")]
    pub backend_url: Option<String>,

    /// Override the value cache TTL in seconds (0 disables caching)
    #[arg(long = "cache-ttl")]
    pub cache_ttl: Option<u64>,

    /// Override the backend request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render a markdown file or every markdown file in a directory
    Render {
        /// File or directory to render (default: root)
        path: Option<PathBuf>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Descend into subdirectories
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
        recursive: Option<bool>,

        /// Run executable blocks
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
        exec: Option<bool>,
    },

    /// Render a directory, then re-render files as they change
    Watch {
        /// Directory to watch (default: root)
        dir: Option<PathBuf>,

        /// Quiet period before a changed file is rendered
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Run executable blocks
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
        exec: Option<bool>,
    },

    /// Print the rendered content of a file without writing it
    Show {
        /// File to render
        file: PathBuf,
    },

    /// Diff rendered content against a git revision without writing
    Diff {
        /// File or directory to diff (default: root)
        path: Option<PathBuf>,

        /// Revision to compare against
        #[arg(long = "ref", default_value = "HEAD")]
        reference: String,

        /// Descend into subdirectories
        #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
        recursive: Option<bool>,

        /// Write the diff to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the backend (and explorer, when enabled) is reachable
    Health,

    /// Write a default codebook.toml
    Init {
        /// Output path, relative to root
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    pub const fn is_init(&self) -> bool {
        matches!(self.command, Commands::Init { .. })
    }
}
