use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Plan step {index} does not exist (plan has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("Corrupt checkpoint for session {session_id}: {reason}")]
    CorruptCheckpoint { session_id: Uuid, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let error = CoreError::CorruptCheckpoint {
            session_id: id,
            reason: "truncated".to_string(),
        };
        assert!(error.to_string().contains(&id.to_string()));
        assert!(error.to_string().contains("truncated"));
    }

    #[test]
    fn test_step_out_of_range_display() {
        let error = CoreError::StepOutOfRange { index: 4, len: 2 };
        assert_eq!(
            error.to_string(),
            "Plan step 4 does not exist (plan has 2 steps)"
        );
    }
}
