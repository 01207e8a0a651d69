//! SQLite-backed [`VectorStore`].
//!
//! Each collection is its own table (`vector_store_docs`, `vector_store_code`,
//! `vector_store_combined`) holding the chunk content, its metadata JSON and
//! the embedding as a little-endian f32 BLOB. Nearest-neighbor search loads
//! the collection's vectors and ranks them by cosine similarity.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::Collection;
use crate::vector::{blob_to_vec, cosine_similarity, vec_to_blob};

use super::VectorStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the collection tables.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_collection_tables(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn truncate(&self, collection: Collection) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {}", collection.table_name()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert(
        &self,
        collection: Collection,
        content: &str,
        metadata_json: &str,
        vector: &[f32],
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (content, metadata_json, embedding, dims) VALUES (?, ?, ?, ?)",
            collection.table_name()
        ))
        .bind(content)
        .bind(metadata_json)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        collection: Collection,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT content, embedding FROM {} ORDER BY id",
            collection.table_name()
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(f64, String)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(vector, &blob_to_vec(&blob));
                (similarity, row.get::<String, _>("content"))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, content)| content).collect())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            collection.table_name()
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}
