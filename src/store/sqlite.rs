//! SQLite-backed [`TranscriptStore`].
//!
//! Maps each store operation onto the single `messages` table created by
//! [`crate::migrate`]. Rows are ordered by `timestamp` with the
//! auto-increment `id` as tie-breaker, since `CURRENT_TIMESTAMP` only has
//! second resolution and turns are often appended within the same second.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::StorageError;
use crate::models::{Role, Turn};

use super::TranscriptStore;

/// SQLite implementation of the [`TranscriptStore`] trait.
pub struct SqliteTranscriptStore {
    pool: SqlitePool,
}

impl SqliteTranscriptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn list_turns(&self) -> Result<Vec<Turn>, StorageError> {
        let rows = sqlx::query("SELECT role, content FROM messages ORDER BY timestamp ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Turn, StorageError> {
                let role: String = row.get("role");
                let content: String = row.get("content");
                Ok(Turn::new(role.parse::<Role>()?, content))
            })
            .collect()
    }

    async fn append_turn(&self, role: Role, content: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO messages (role, content) VALUES (?, ?)")
            .bind(role.as_str())
            .bind(content)
            .execute(&self.pool)
            .await?;
        debug!(%role, content_len = content.len(), "appended turn");
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await?;
        debug!(deleted = result.rows_affected(), "cleared transcript");
        Ok(())
    }
}
