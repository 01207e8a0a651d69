use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::models::Collection;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_collection_tables(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create one vector table per [`Collection`]. Idempotent.
pub async fn create_collection_tables(pool: &SqlitePool) -> Result<()> {
    for collection in Collection::ALL {
        let table = collection.table_name();

        // Table names come from the Collection enum, never from user input.
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{{}}',
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}
