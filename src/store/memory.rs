//! In-memory [`VectorStore`] used by tests.
//!
//! Rows live in a `Vec` per collection behind a `std::sync::RwLock`; search is
//! a brute-force cosine scan.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Collection;
use crate::vector::cosine_similarity;

use super::VectorStore;

#[derive(Debug, Clone)]
struct StoredRow {
    content: String,
    metadata_json: String,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryStore {
    rows: RwLock<HashMap<Collection, Vec<StoredRow>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata rows of a collection, in insertion order.
    pub fn metadata(&self, collection: Collection) -> Vec<String> {
        self.rows
            .read()
            .map(|rows| {
                rows.get(&collection)
                    .map(|r| r.iter().map(|row| row.metadata_json.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn truncate(&self, collection: Collection) -> Result<()> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        rows.remove(&collection);
        Ok(())
    }

    async fn insert(
        &self,
        collection: Collection,
        content: &str,
        metadata_json: &str,
        vector: &[f32],
    ) -> Result<()> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        rows.entry(collection).or_default().push(StoredRow {
            content: content.to_string(),
            metadata_json: metadata_json.to_string(),
            vector: vector.to_vec(),
        });
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        collection: Collection,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<String>> {
        let rows = self.rows.read().map_err(poisoned)?;
        let Some(stored) = rows.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f64, &StoredRow)> = stored
            .iter()
            .map(|row| (cosine_similarity(vector, &row.vector), row))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, row)| row.content.clone())
            .collect())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows.get(&collection).map(|r| r.len() as u64).unwrap_or(0))
    }
}
