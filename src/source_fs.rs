//! Filesystem document source.
//!
//! Walks `[source].root` and yields `(doc_id, source_path, raw_text)` tuples
//! for files matching the include globs. The doc_id is the path relative to
//! the root with `/` separators, so re-scanning the same tree addresses the
//! same documents.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::SourceConfig;

/// One file read from the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub doc_id: String,
    pub source_path: String,
    pub text: String,
}

pub fn scan_filesystem(source: &SourceConfig) -> Result<Vec<SourceFile>> {
    let root = &source.root;
    if !root.exists() {
        bail!("Source root does not exist: {}", root.display());
    }

    let include_set = build_globset(&source.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(source.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(source.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_text(path) {
            Some(text) => files.push(SourceFile {
                doc_id: rel_str,
                source_path: path.display().to_string(),
                text,
            }),
            None => warn!(path = %path.display(), "skipping non-UTF-8 file"),
        }
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    debug!(root = %root.display(), files = files.len(), "scanned source tree");

    Ok(files)
}

/// Read a single file as a document (`hsx ingest-file`).
pub fn read_file(doc_id: &str, path: &Path) -> Result<SourceFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(SourceFile {
        doc_id: doc_id.to_string(),
        source_path: path.display().to_string(),
        text,
    })
}

fn read_text(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}
