//! Text analysis shared by the sparse index and query fingerprinting.
//!
//! The analyzer lowercases, splits on any non-alphanumeric character and
//! drops a short list of English function words. No stemming is applied:
//! BM25 candidate selection is an exact term intersection.

use sha2::{Digest, Sha256};

/// Function words removed before indexing and querying.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Split text into normalized index terms.
///
/// # Example
///
/// ```rust
/// use hybrid_search_core::text::analyze;
///
/// assert_eq!(analyze("The BM25-ranker, ranks!"), vec!["bm25", "ranker", "ranks"]);
/// ```
pub fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Stable fingerprint of a query, used to attribute feedback to served
/// queries.
///
/// Two queries that analyze to the same term sequence share a fingerprint,
/// so `"Hybrid  retrieval?"` and `"hybrid retrieval"` are the same query.
pub fn query_fingerprint(query: &str) -> String {
    let normalized = analyze(query).join(" ");
    let digest = sha256_hex(normalized.as_bytes());
    digest[..16].to_string()
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
