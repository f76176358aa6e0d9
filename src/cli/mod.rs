//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

/// docseek - hybrid lexical and semantic document retrieval
#[derive(Parser, Debug)]
#[command(name = "docseek")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/docseek/config.toml)
    #[arg(long, global = true, env = "DOCSEEK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the index database
    #[arg(long, global = true, env = "DOCSEEK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and index a file or directory
    Ingest(commands::ingest::IngestArgs),

    /// Search indexed documents
    Search(commands::search::SearchArgs),

    /// Remove a document from every index
    Delete(commands::delete::DeleteArgs),

    /// Show index and cache statistics
    Stats(commands::stats::StatsArgs),

    /// Rebuild the lexical index and embed chunks that lack vectors
    Reindex(commands::reindex::ReindexArgs),
}
