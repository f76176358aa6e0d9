//! docseek search - Search indexed documents
//!
//! Hybrid BM25 + ensemble-embedding search with the semantic query cache in
//! front of it. `--bm25-only` skips embedding entirely.

use clap::Args;
use colored::Colorize;
use tracing::warn;

use crate::app::AppContext;
use crate::cli::output::{emit_json, json_ok, truncate_str};
use crate::error::{DocseekError, Result};
use crate::types::{MetadataFilter, SearchOptions, SearchResult};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Maximum number of results
    #[arg(long, short, default_value = "10")]
    pub limit: usize,

    /// Minimum cosine similarity for vector candidates (default from config)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Lexical scoring only
    #[arg(long)]
    pub bm25_only: bool,

    /// Bypass the query cache
    #[arg(long)]
    pub no_cache: bool,

    /// Metadata filter as key=value (repeatable, all must match)
    #[arg(long = "filter", short = 'f', value_name = "KEY=VALUE")]
    pub filters: Vec<String>,
}

pub fn run(ctx: &AppContext, args: &SearchArgs) -> Result<()> {
    let options = build_options(ctx, args)?;
    let cancel = ctx.cancel_on_interrupt();

    let results = ctx.block_on(ctx.engine.search_with_cancel(&args.query, &options, &cancel))?;

    if let Err(err) = ctx.engine.save_cache() {
        warn!(error = %err, "Could not persist query cache");
    }

    display_results(ctx, args, &results)
}

fn build_options(ctx: &AppContext, args: &SearchArgs) -> Result<SearchOptions> {
    let mut options = ctx.engine.default_options().with_limit(args.limit);
    if let Some(threshold) = args.threshold {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(DocseekError::MalformedInput(format!(
                "threshold {threshold} is outside [-1, 1]"
            )));
        }
        options.threshold = threshold;
    }
    if args.bm25_only {
        options = options.lexical_only();
    }
    if args.no_cache {
        options = options.without_cache();
    }
    for raw in &args.filters {
        let filter = MetadataFilter::parse(raw).ok_or_else(|| {
            DocseekError::MalformedInput(format!("filter '{raw}' is not key=value"))
        })?;
        options = options.with_filter(filter);
    }
    Ok(options)
}

fn display_results(ctx: &AppContext, args: &SearchArgs, results: &[SearchResult]) -> Result<()> {
    if ctx.json_mode {
        return emit_json(&json_ok(serde_json::json!({
            "query": args.query,
            "count": results.len(),
            "limit": args.limit,
            "hybrid": !args.bm25_only,
            "results": results,
        })));
    }

    if results.is_empty() {
        println!(
            "{} No results for '{}'",
            "!".yellow(),
            args.query.cyan()
        );
        println!();
        println!("Try:");
        println!("  - Using different keywords");
        println!("  - Lowering --threshold");
        println!("  - Removing --filter conditions");
        return Ok(());
    }

    println!(
        "{} results for '{}':",
        results.len().to_string().bold(),
        args.query.cyan()
    );
    println!();

    for (i, result) in results.iter().enumerate() {
        let rank = format!("{}.", i + 1);
        println!(
            "{:4} {} {}",
            rank.dimmed(),
            result.chunk_id.to_string().bold(),
            format!("{:.3}", result.combined_score).green()
        );
        println!(
            "     bm25 {:.3}  vector {:.3}  boost {:.2}",
            result.bm25_score, result.vector_score, result.boost
        );
        if !result.matched_terms.is_empty() {
            println!("     terms: {}", result.matched_terms.join(", ").yellow());
        }
        let snippet = result.content.replace('\n', " ");
        println!("     {}", truncate_str(&snippet, 100).dimmed());
        println!();
    }

    Ok(())
}
