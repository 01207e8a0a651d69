//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only storage surface the ingestion and
//! retrieval pipeline needs: truncate a collection, insert a chunk with its
//! vector, and fetch the contents nearest to a query vector.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`truncate`](VectorStore::truncate) | Remove every row of a collection |
//! | [`insert`](VectorStore::insert) | Add one chunk with metadata and vector |
//! | [`nearest_neighbors`](VectorStore::nearest_neighbors) | Top-k contents by cosine similarity |
//! | [`count`](VectorStore::count) | Number of rows in a collection |
//!
//! Implementations must be `Send + Sync` to be shared across async tasks.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Collection;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Delete every row of `collection`.
    async fn truncate(&self, collection: Collection) -> Result<()>;

    /// Append one row to `collection`.
    async fn insert(
        &self,
        collection: Collection,
        content: &str,
        metadata_json: &str,
        vector: &[f32],
    ) -> Result<()>;

    /// Up to `k` contents of `collection`, most similar first.
    ///
    /// Ties keep insertion order. An empty collection yields an empty list.
    async fn nearest_neighbors(
        &self,
        collection: Collection,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<String>>;

    async fn count(&self, collection: Collection) -> Result<u64>;
}
