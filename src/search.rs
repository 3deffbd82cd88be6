//! `hsx search` and `hsx feedback`.

use anyhow::Result;

use hybrid_search_core::{QueryOptions, QueryResponse};

use crate::app::{open_engine, weight_override};
use crate::config::Config;

pub struct SearchArgs {
    pub query: String,
    pub k: Option<usize>,
    pub bm25_weight: Option<f64>,
    pub vector_weight: Option<f64>,
    pub explain: bool,
    pub json: bool,
}

pub async fn run_search(config: &Config, args: SearchArgs) -> Result<()> {
    let engine = open_engine(config).await?;
    let params = &engine.params().retrieval;
    let k = args.k.unwrap_or(params.final_limit);
    let opts = QueryOptions {
        weights: weight_override(params.weights, args.bm25_weight, args.vector_weight),
        ..QueryOptions::default()
    };

    let response = engine.query(&args.query, k, &opts).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_results(&response, args.explain);
    }
    Ok(())
}

fn print_results(response: &QueryResponse, explain: bool) {
    if response.degraded {
        println!("(query embedding failed; keyword results only)");
    }
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            result.score,
            result.doc_id,
            result.chunk_id
        );
        println!("    source: {}", result.source_path);
        println!("    excerpt: \"{}\"", excerpt(&result.text, 160));
        if explain {
            let c = &result.components;
            println!(
                "    bm25: {:.3} (raw {})  vector: {:.3} (raw {})  bias: {:+.3}",
                c.bm25,
                fmt_raw(c.raw_bm25),
                c.vector,
                fmt_raw(c.raw_vector),
                c.bias
            );
        }
        println!();
    }

    if explain {
        println!(
            "version {}  sparse {:.2} ms  dense {:.2} ms  fusion {:.2} ms  total {:.2} ms",
            response.version,
            response.timings.sparse_ms,
            response.timings.dense_ms,
            response.timings.fusion_ms,
            response.total_ms
        );
    }
}

fn fmt_raw(raw: Option<f64>) -> String {
    raw.map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "-".to_string())
}

/// First `max_chars` characters of `text` on one line.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

pub async fn run_feedback(config: &Config, query: &str, doc_id: &str, label: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    let ack = engine.submit_feedback(query, doc_id, label).await?;
    println!(
        "{}: {} feedback recorded, bias now {:+.3}",
        ack.doc_id, ack.label, ack.bias
    );
    Ok(())
}
