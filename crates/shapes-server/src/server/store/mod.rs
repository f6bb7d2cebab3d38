//! Document store boundary.
//!
//! The [`DocumentStore`] trait is everything the document service needs from
//! a key-document engine: single-document writes that are atomic on their
//! own, a point lookup, and a lazy scan. Outcomes are reported raw (match and
//! modify counts, the key as the engine encodes it) and are classified by the
//! service, never here.
//!
//! [`memory::InMemoryStore`] is the engine shipped with the server.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use shapes_core::types::{DocumentFields, DocumentId, StoredDocument};

pub type StoreResult<T> = Result<T, StoreError>;

/// A lazy, single-use cursor over every stored document.
pub type DocumentCursor = BoxStream<'static, StoreResult<StoredDocument>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// A stored record could not be decoded into a document.
    #[error("failed to decode document {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Any other failure reported by the engine.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Outcome of a [`DocumentStore::replace`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub matched: u64,
    pub modified: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Stores a new document and returns the key the engine assigned to it,
    /// in the engine's textual encoding.
    async fn insert(&self, fields: DocumentFields) -> StoreResult<String>;

    /// Looks up one document. `Ok(None)` means no document has this id.
    async fn find_one(&self, id: &DocumentId) -> StoreResult<Option<StoredDocument>>;

    /// Replaces every field of the document with `id`.
    async fn replace(&self, id: &DocumentId, fields: DocumentFields) -> StoreResult<ReplaceOutcome>;

    /// Removes the document with `id` and returns how many were removed.
    async fn delete(&self, id: &DocumentId) -> StoreResult<u64>;

    /// Opens a fresh cursor over all documents.
    fn scan(&self) -> DocumentCursor;

    /// Releases the engine. Later operations fail with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
