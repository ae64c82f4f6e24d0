use fleet_core::{Capability, CoreError, SessionEnd};
use thiserror::Error;
use uuid::Uuid;

/// Failures of the external planning capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Planner unavailable: {0}")]
    Unavailable(String),

    #[error("Planner produced an empty plan")]
    EmptyPlan,

    #[error("Plan step {index} needs capability {capability} which has no registered executor")]
    UnknownCapability { index: usize, capability: Capability },

    #[error("Unusable plan: {0}")]
    Unusable(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Fatal planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Checkpoint write failed for round {round}: {reason}")]
    CheckpointWrite { round: u64, reason: String },

    #[error("Checkpoint store error: {0}")]
    Database(#[from] db::DbError),

    #[error("Ledger error: {0}")]
    Core(#[from] CoreError),

    #[error("Session already running: {0}")]
    SessionExists(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {session_id} already {} after {rounds} rounds", .end.as_str())]
    SessionFinished {
        session_id: Uuid,
        rounds: u64,
        end: SessionEnd,
    },

    #[error("Event handle for session {found} cannot drive session {expected}")]
    SessionMismatch { expected: Uuid, found: Uuid },

    #[error("Executor for capability {0} registered twice")]
    DuplicateExecutor(Capability),

    #[error("Resource acquisition failed: {0}")]
    ResourceAcquisitionFailed(String),

    #[error("Context memory error: {0}")]
    Memory(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn checkpoint_write(round: u64, reason: impl Into<String>) -> Self {
        Self::CheckpointWrite {
            round,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
