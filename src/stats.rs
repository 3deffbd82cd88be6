//! Index statistics overview.
//!
//! Summarizes what's indexed: document and chunk counts, embedding coverage,
//! vocabulary size and the documents feedback has moved the most. Used by
//! `hsx stats` to confirm that ingestion and backfills are working.

use anyhow::Result;

use crate::app::open_engine;
use crate::config::Config;

/// How many of the most-biased documents to list.
const TOP_BIASED: usize = 10;

pub async fn run_stats(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;
    let stats = engine.stats();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let embedded = stats.chunks - stats.sparse_only_chunks;

    println!("hybrid-search — Index Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Version:     {}", stats.version);
    println!();
    println!("  Documents:   {}", stats.live_documents);
    println!("  Purged:      {}", stats.tombstoned_documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        embedded,
        stats.chunks,
        if stats.chunks > 0 {
            (embedded * 100) / stats.chunks
        } else {
            0
        }
    );
    println!(
        "  Model:       {} ({})",
        stats.embedding_model,
        stats
            .dims
            .map(|d| format!("{} dims", d))
            .unwrap_or_else(|| "no vectors".to_string())
    );
    println!("  Vocabulary:  {} terms", stats.vocabulary_size);
    println!("  Feedback:    {} records", stats.feedback_records);

    let mut biased: Vec<(String, f64)> = engine
        .feedback()
        .biases()
        .into_iter()
        .filter(|(_, b)| *b != 0.0)
        .collect();
    biased.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    biased.truncate(TOP_BIASED);

    if !biased.is_empty() {
        println!();
        println!("  Feedback bias:");
        println!("  {:<48} {:>8}", "DOCUMENT", "BIAS");
        println!("  {}", "-".repeat(57));
        for (doc_id, bias) in &biased {
            println!("  {:<48} {:>+8.3}", doc_id, bias);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
