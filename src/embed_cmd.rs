use anyhow::{bail, Result};

use crate::app::open_engine;
use crate::config::Config;

/// Retry embedding for every sparse-only chunk (`hsx embed pending`).
pub async fn run_embed_pending(config: &Config, dry_run: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let engine = open_engine(config).await?;
    let pending = engine.snapshot().sparse_only_count();

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending);
        return Ok(());
    }

    if pending == 0 {
        println!("embed pending");
        println!("  all chunks up to date");
        return Ok(());
    }

    let embedded = engine.backfill_embeddings().await?;
    let remaining = engine.snapshot().sparse_only_count();

    println!("embed pending");
    println!("  embedded: {}", embedded);
    println!("  still pending: {}", remaining);
    println!("ok");
    Ok(())
}
