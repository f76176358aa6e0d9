//! docseek delete - Remove a document from every index

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, json_ok};
use crate::error::Result;
use crate::types::DocumentId;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Document id as shown by `docseek ingest`
    pub document_id: String,
}

pub fn run(ctx: &AppContext, args: &DeleteArgs) -> Result<()> {
    let document_id = DocumentId::from(args.document_id.as_str());
    let removed = ctx.engine.delete_document(&document_id)?;
    ctx.engine.save_cache()?;

    if ctx.json_mode {
        emit_json(&json_ok(serde_json::json!({
            "document_id": document_id,
            "chunks_removed": removed,
        })))
    } else {
        println!(
            "{} Deleted {} ({removed} chunks)",
            "✓".green(),
            document_id.to_string().cyan()
        );
        Ok(())
    }
}
