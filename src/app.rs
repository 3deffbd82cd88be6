//! Engine construction from configuration.

use anyhow::{Context, Result};
use std::sync::Arc;

use hybrid_search_core::search::FusionWeights;
use hybrid_search_core::Engine;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

/// Open the SQLite-backed engine described by `config`.
///
/// Restores every stored document and replays the feedback log; nothing is
/// re-embedded.
pub async fn open_engine(config: &Config) -> Result<Engine> {
    let embedder = create_provider(&config.embedding)?;
    let store = SqliteStore::open(config)
        .await
        .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;

    let engine = Engine::open(config.engine_params(), embedder, Arc::new(store))
        .await
        .context("Failed to restore index from database")?;
    Ok(engine)
}

/// Per-query weight override from optional CLI/HTTP arguments.
///
/// `None` when neither weight is given; a single given weight is paired
/// with the configured value of the other.
pub fn weight_override(
    defaults: FusionWeights,
    bm25: Option<f64>,
    vector: Option<f64>,
) -> Option<FusionWeights> {
    if bm25.is_none() && vector.is_none() {
        return None;
    }
    Some(FusionWeights {
        bm25: bm25.unwrap_or(defaults.bm25),
        vector: vector.unwrap_or(defaults.vector),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_override() {
        let defaults = FusionWeights::default();
        assert_eq!(weight_override(defaults, None, None), None);
        assert_eq!(
            weight_override(defaults, Some(1.0), None),
            Some(FusionWeights {
                bm25: 1.0,
                vector: 0.7
            })
        );
        assert_eq!(
            weight_override(defaults, Some(0.5), Some(0.5)),
            Some(FusionWeights {
                bm25: 0.5,
                vector: 0.5
            })
        );
    }
}
