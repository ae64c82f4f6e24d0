use fleet_core::CoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt checkpoint for session {session_id}: {reason}")]
    CorruptCheckpoint { session_id: Uuid, reason: String },

    #[error("Checkpoint for session {found} cannot be stored under session {expected}")]
    SessionMismatch { expected: Uuid, found: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptCheckpoint { .. })
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CorruptCheckpoint { session_id, reason } => {
                Self::CorruptCheckpoint { session_id, reason }
            }
            other => Self::Serialization(other.to_string()),
        }
    }
}
