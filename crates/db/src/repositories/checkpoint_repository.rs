use async_trait::async_trait;
use fleet_core::Checkpoint;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{CheckpointRow, CheckpointSummary, CheckpointSummaryRow};
use crate::store::{ensure_session, CheckpointStore};

/// SQLite-backed checkpoint store.
///
/// A save is a single upsert statement, so a concurrent reader sees either the
/// previous row or the new one.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = crate::create_pool(database_url).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, session_id: Uuid, checkpoint: &Checkpoint) -> Result<(), DbError> {
        ensure_session(session_id, checkpoint)?;
        let row = CheckpointRow::encode(checkpoint)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (session_id, round_index, blob, saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                round_index = excluded.round_index,
                blob = excluded.blob,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(&row.session_id)
        .bind(row.round_index)
        .bind(&row.blob)
        .bind(row.saved_at)
        .execute(&self.pool)
        .await?;

        debug!(session_id = %session_id, round = checkpoint.round_index, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<Checkpoint>, DbError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT session_id, round_index, blob, saved_at
            FROM checkpoints
            WHERE session_id = ?
            "#,
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckpointRow::into_domain).transpose()
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, DbError> {
        let rows: Vec<CheckpointSummaryRow> = sqlx::query_as(
            r#"
            SELECT session_id, round_index, saved_at
            FROM checkpoints
            ORDER BY saved_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(CheckpointSummaryRow::into_summary)
            .collect())
    }
}
