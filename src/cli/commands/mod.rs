//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::Result;

pub mod delete;
pub mod ingest;
pub mod reindex;
pub mod search;
pub mod stats;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Ingest(args) => ingest::run(ctx, args),
        Commands::Search(args) => search::run(ctx, args),
        Commands::Delete(args) => delete::run(ctx, args),
        Commands::Stats(args) => stats::run(ctx, args),
        Commands::Reindex(args) => reindex::run(ctx, args),
    }
}
