use chrono::{DateTime, TimeZone, Utc};
use fleet_core::Checkpoint;
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRow {
    pub session_id: String,
    pub round_index: i64,
    pub blob: Vec<u8>,
    pub saved_at: i64,
}

impl CheckpointRow {
    pub fn encode(checkpoint: &Checkpoint) -> Result<Self, DbError> {
        Ok(Self {
            session_id: checkpoint.session_id.to_string(),
            round_index: checkpoint.round_index as i64,
            blob: checkpoint.to_blob()?,
            saved_at: checkpoint.saved_at.timestamp(),
        })
    }

    /// Decode the stored blob; the indexed columns must agree with it.
    pub fn into_domain(self) -> Result<Checkpoint, DbError> {
        let session_id =
            Uuid::parse_str(&self.session_id).map_err(|e| DbError::CorruptCheckpoint {
                session_id: Uuid::nil(),
                reason: format!("invalid session id {:?}: {e}", self.session_id),
            })?;

        let checkpoint = Checkpoint::from_blob(session_id, &self.blob)?;
        if checkpoint.round_index as i64 != self.round_index {
            return Err(DbError::CorruptCheckpoint {
                session_id,
                reason: format!(
                    "row round {} disagrees with blob round {}",
                    self.round_index, checkpoint.round_index
                ),
            });
        }

        Ok(checkpoint)
    }
}

/// Lightweight listing entry; the blob is not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub session_id: Uuid,
    pub round_index: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CheckpointSummaryRow {
    pub session_id: String,
    pub round_index: i64,
    pub saved_at: i64,
}

impl CheckpointSummaryRow {
    pub(crate) fn into_summary(self) -> Option<CheckpointSummary> {
        Some(CheckpointSummary {
            session_id: Uuid::parse_str(&self.session_id).ok()?,
            round_index: u64::try_from(self.round_index).ok()?,
            saved_at: timestamp_to_datetime(self.saved_at),
        })
    }
}

pub(crate) fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}
