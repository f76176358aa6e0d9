//! docseek stats - Index and cache statistics

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_json, json_ok};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct StatsArgs {}

pub fn run(ctx: &AppContext, _args: &StatsArgs) -> Result<()> {
    let stats = ctx.engine.stats();

    if ctx.json_mode {
        return emit_json(&json_ok(&stats));
    }

    let models = ctx.engine.ensemble().model_names().collect::<Vec<_>>().join(", ");
    let mut layout = HumanLayout::new();
    layout
        .title("docseek index")
        .kv("Data dir", &ctx.data_dir().display().to_string())
        .kv("Documents", &stats.document_count.to_string())
        .kv("Chunks", &stats.chunk_count.to_string())
        .kv("Vectors", &stats.vector_count.to_string())
        .kv("Models", &models)
        .blank()
        .section("Query cache")
        .kv("Entries", &format!("{} / {}", stats.cache.size, stats.cache.capacity))
        .kv("Hit rate", &format!("{:.1}%", stats.cache_hit_rate * 100.0))
        .kv(
            "Hits (exact/semantic)",
            &format!("{} / {}", stats.cache.exact_hits, stats.cache.semantic_hits),
        )
        .kv("Evictions", &stats.cache.evictions.to_string())
        .kv("Expirations", &stats.cache.expirations.to_string());
    emit_human(layout);
    Ok(())
}
