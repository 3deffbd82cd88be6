//! Storage abstraction for the engine.
//!
//! The in-memory snapshot is the query path's source of truth; a [`Store`]
//! only makes it survive a restart. The indexer writes every published
//! document change through it, and [`Engine::open`](crate::engine::Engine::open)
//! rebuilds the snapshot and the bias table from it without re-embedding.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Chunk, FeedbackRecord};
use crate::snapshot::DocEntry;

/// Abstract persistence backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put_document`](Store::put_document) | Write a document row together with its chunks |
/// | [`replace_chunks`](Store::replace_chunks) | Replace the chunks (and vectors) of a stored document |
/// | [`tombstone_document`](Store::tombstone_document) | Soft-delete a document and drop its chunks |
/// | [`append_feedback`](Store::append_feedback) | Append one feedback record |
/// | [`load_documents`](Store::load_documents) | Every document with its chunks, for restore |
/// | [`load_feedback`](Store::load_feedback) | Every feedback record, oldest first |
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name used in error messages and logs.
    fn backend(&self) -> &str;

    /// Insert or update a document and replace all of its chunks, atomically.
    ///
    /// The row carries the content hash that lets a later ingest skip
    /// unchanged text, so it must never be stored without its chunks.
    /// Clears `deleted_at` on re-ingest.
    async fn put_document(&self, entry: &DocEntry) -> Result<()>;

    /// Replace all chunks of an already stored document in one step.
    ///
    /// `vectors[i]` belongs to `chunks[i]`; `None` stores the chunk without
    /// an embedding.
    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: &[Option<Arc<[f32]>>],
    ) -> Result<()>;

    /// Mark a document deleted and remove its chunks. Feedback is kept.
    async fn tombstone_document(&self, doc_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn append_feedback(&self, record: &FeedbackRecord) -> Result<()>;

    /// Every stored document, live or tombstoned, with its chunks in index
    /// order.
    async fn load_documents(&self) -> Result<Vec<DocEntry>>;

    /// Every feedback record ordered by timestamp.
    async fn load_feedback(&self) -> Result<Vec<FeedbackRecord>>;
}
