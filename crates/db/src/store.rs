use std::collections::HashMap;

use async_trait::async_trait;
use fleet_core::Checkpoint;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{timestamp_to_datetime, CheckpointSummary};

/// Latest-only, atomically overwritten checkpoint storage keyed by session.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the stored checkpoint for `session_id`. Readers observe either
    /// the previous checkpoint or the new one, never a partial write.
    async fn save(&self, session_id: Uuid, checkpoint: &Checkpoint) -> Result<(), DbError>;

    /// Latest checkpoint, or `None` for a fresh session.
    async fn load(&self, session_id: Uuid) -> Result<Option<Checkpoint>, DbError>;

    async fn delete(&self, session_id: Uuid) -> Result<bool, DbError>;

    async fn list(&self) -> Result<Vec<CheckpointSummary>, DbError>;
}

pub(crate) fn ensure_session(session_id: Uuid, checkpoint: &Checkpoint) -> Result<(), DbError> {
    if checkpoint.session_id != session_id {
        return Err(DbError::SessionMismatch {
            expected: session_id,
            found: checkpoint.session_id,
        });
    }
    Ok(())
}

struct StoredBlob {
    round_index: u64,
    saved_at: i64,
    blob: Vec<u8>,
}

/// In-process store holding serialized blobs, for tests and single-process use.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    blobs: RwLock<HashMap<Uuid, StoredBlob>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under a session, bypassing encoding.
    pub async fn put_raw(&self, session_id: Uuid, round_index: u64, blob: Vec<u8>) {
        self.blobs.write().await.insert(
            session_id,
            StoredBlob {
                round_index,
                saved_at: 0,
                blob,
            },
        );
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, session_id: Uuid, checkpoint: &Checkpoint) -> Result<(), DbError> {
        ensure_session(session_id, checkpoint)?;
        let blob = checkpoint.to_blob()?;
        self.blobs.write().await.insert(
            session_id,
            StoredBlob {
                round_index: checkpoint.round_index,
                saved_at: checkpoint.saved_at.timestamp(),
                blob,
            },
        );
        debug!(session_id = %session_id, round = checkpoint.round_index, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<Checkpoint>, DbError> {
        let blobs = self.blobs.read().await;
        match blobs.get(&session_id) {
            Some(stored) => Ok(Some(Checkpoint::from_blob(session_id, &stored.blob)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, DbError> {
        Ok(self.blobs.write().await.remove(&session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, DbError> {
        let blobs = self.blobs.read().await;
        let mut summaries: Vec<CheckpointSummary> = blobs
            .iter()
            .map(|(session_id, stored)| CheckpointSummary {
                session_id: *session_id,
                round_index: stored.round_index,
                saved_at: timestamp_to_datetime(stored.saved_at),
            })
            .collect();
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }
}
