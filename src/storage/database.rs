use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::preferences::{PrefResult, PrefValue, PreferenceBackend};

/// SQLite database holding every preference partition
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the database at `db_path` and run migrations
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create database directory")?;
        }

        info!("Opening database at: {:?}", db_path);

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool, db_path };
        db.migrate().await?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, key)
            )
            "#
        )
        .execute(&self.pool)
        .await
        .context("Failed to create preferences table")?;

        debug!("Database migrations completed");
        Ok(())
    }

    /// Number of stored entries in a partition
    pub async fn count_entries(&self, partition: &str) -> PrefResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM preferences WHERE namespace = ?")
            .bind(partition)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Close the pool, waiting for in-flight statements
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PreferenceBackend for Database {
    async fn get(&self, partition: &str, key: &str) -> PrefResult<Option<PrefValue>> {
        let raw = sqlx::query_scalar::<_, String>(
            "SELECT value FROM preferences WHERE namespace = ? AND key = ?"
        )
        .bind(partition)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, partition: &str, key: &str, value: &PrefValue) -> PrefResult<()> {
        let json = serde_json::to_string(value)?;

        // Single upsert: readers observe the old row or the new one, never a partial write
        sqlx::query(
            "INSERT INTO preferences (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"
        )
        .bind(partition)
        .bind(key)
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn contains(&self, partition: &str, key: &str) -> PrefResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM preferences WHERE namespace = ? AND key = ?"
        )
        .bind(partition)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn remove(&self, partition: &str, key: &str) -> PrefResult<bool> {
        let result = sqlx::query("DELETE FROM preferences WHERE namespace = ? AND key = ?")
            .bind(partition)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, partition: &str) -> PrefResult<()> {
        let result = sqlx::query("DELETE FROM preferences WHERE namespace = ?")
            .bind(partition)
            .execute(&self.pool)
            .await?;

        debug!("Removed {} entries from '{}'", result.rows_affected(), partition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_remove() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("test.db")).await.unwrap();

        db.put("p", "k", &PrefValue::Int(42)).await.unwrap();
        assert_eq!(db.get("p", "k").await.unwrap(), Some(PrefValue::Int(42)));

        db.put("p", "k", &PrefValue::Str("v".into())).await.unwrap();
        assert_eq!(db.get("p", "k").await.unwrap(), Some(PrefValue::Str("v".into())));
        assert_eq!(db.count_entries("p").await.unwrap(), 1);

        assert!(db.remove("p", "k").await.unwrap());
        assert!(!db.remove("p", "k").await.unwrap());
        assert_eq!(db.get("p", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("test.db")).await.unwrap();

        db.put("a", "k", &PrefValue::Bool(true)).await.unwrap();
        db.put("b", "k", &PrefValue::Bool(false)).await.unwrap();
        db.clear("a").await.unwrap();

        assert_eq!(db.get("a", "k").await.unwrap(), None);
        assert_eq!(db.get("b", "k").await.unwrap(), Some(PrefValue::Bool(false)));
    }
}
