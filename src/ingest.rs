//! Ingestion commands.
//!
//! `hsx ingest` walks the configured source tree and feeds every file through
//! the engine; unchanged files are skipped by content hash. `--prune` purges
//! documents under the root whose files are gone. `hsx ingest-file` and
//! `hsx purge` act on a single document.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::app::open_engine;
use crate::config::{Config, SourceConfig};
use crate::source_fs::{read_file, scan_filesystem};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub chunks: usize,
    pub sparse_only: usize,
    pub purged: usize,
}

pub async fn run_ingest(config: &Config, path: Option<PathBuf>, prune: bool) -> Result<()> {
    let source = match (path, &config.source) {
        (Some(root), Some(configured)) => SourceConfig {
            root,
            ..configured.clone()
        },
        (Some(root), None) => SourceConfig {
            root,
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        },
        (None, Some(configured)) => configured.clone(),
        (None, None) => bail!("No source configured. Add a [source] section or pass --path."),
    };

    let engine = open_engine(config).await?;
    let files = scan_filesystem(&source)?;

    let mut summary = IngestSummary {
        scanned: files.len(),
        ..IngestSummary::default()
    };

    for file in &files {
        let result = engine.ingest(&file.doc_id, &file.source_path, &file.text).await?;
        if result.skipped {
            summary.skipped += 1;
        } else {
            summary.indexed += 1;
            summary.chunks += result.chunks_added;
            summary.sparse_only += result.sparse_only;
        }
    }

    if prune {
        let seen: HashSet<&str> = files.iter().map(|f| f.doc_id.as_str()).collect();
        let root_prefix = source.root.display().to_string();
        let stale: Vec<String> = engine
            .snapshot()
            .documents()
            .filter(|e| e.document.is_live())
            .filter(|e| e.document.source_path.starts_with(&root_prefix))
            .filter(|e| !seen.contains(e.document.id.as_str()))
            .map(|e| e.document.id.clone())
            .collect();
        for doc_id in stale {
            if engine.purge(&doc_id).await? {
                summary.purged += 1;
            }
        }
    }

    if summary.sparse_only > 0 {
        warn!(
            sparse_only = summary.sparse_only,
            "some chunks were indexed without embeddings; run `hsx embed pending`"
        );
    }
    info!(?summary, version = engine.snapshot().version(), "ingest finished");

    println!("ingest {}", source.root.display());
    println!("  files scanned: {}", summary.scanned);
    println!("  documents indexed: {}", summary.indexed);
    println!("  unchanged: {}", summary.skipped);
    println!("  chunks written: {}", summary.chunks);
    if summary.sparse_only > 0 {
        println!("  sparse-only chunks: {}", summary.sparse_only);
    }
    if prune {
        println!("  purged: {}", summary.purged);
    }
    println!("ok");
    Ok(())
}

pub async fn run_ingest_file(config: &Config, doc_id: &str, path: &Path) -> Result<()> {
    let file = read_file(doc_id, path)?;
    let engine = open_engine(config).await?;
    let result = engine.ingest(&file.doc_id, &file.source_path, &file.text).await?;

    if result.skipped {
        println!("{}: unchanged (version {})", result.doc_id, result.version);
    } else {
        println!(
            "{}: {} chunks ({} sparse-only), version {}",
            result.doc_id, result.chunks_added, result.sparse_only, result.version
        );
    }
    Ok(())
}

pub async fn run_purge(config: &Config, doc_id: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    if !engine.purge(doc_id).await? {
        bail!("No live document with id: {}", doc_id);
    }
    println!("{}: purged (version {})", doc_id, engine.snapshot().version());
    Ok(())
}
