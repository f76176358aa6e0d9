//! docseek reindex - Rebuild the lexical index and fill in missing vectors

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, json_ok};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ReindexArgs {
    /// Skip embedding chunks that have no vector entry
    #[arg(long)]
    pub lexical_only: bool,
}

pub fn run(ctx: &AppContext, args: &ReindexArgs) -> Result<()> {
    let chunks = ctx.engine.rebuild_lexical_index()?;
    let embedded = if args.lexical_only {
        0
    } else {
        let cancel = ctx.cancel_on_interrupt();
        ctx.block_on(ctx.engine.embed_missing(&cancel))?
    };
    ctx.engine.verify()?;
    ctx.engine.save_cache()?;

    if ctx.json_mode {
        emit_json(&json_ok(serde_json::json!({
            "chunks": chunks,
            "embedded": embedded,
        })))
    } else {
        println!(
            "{} Rebuilt lexical index over {} chunks, embedded {} missing",
            "✓".green(),
            chunks.to_string().bold(),
            embedded.to_string().bold()
        );
        Ok(())
    }
}
