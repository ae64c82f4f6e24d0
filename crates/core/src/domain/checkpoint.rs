use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ledger::Ledger;
use super::task::Capability;
use crate::error::{CoreError, Result};

/// One condensed line of interaction history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub round: u64,
    pub step_index: Option<usize>,
    pub capability: Option<Capability>,
    pub summary: String,
}

/// How a session ended, carried only by its final checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionEnd {
    Completed,
    Failed { reason: String },
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Snapshot of a session at a committed round boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub session_id: Uuid,
    pub round_index: u64,
    pub ledger: Ledger,
    pub history: Vec<HistoryEntry>,
    /// Sequence number carried by this round's `round.completed` event.
    pub event_sequence: u64,
    pub saved_at: DateTime<Utc>,
    /// Set when this round ended the session; such a session is never resumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<SessionEnd>,
}

impl Checkpoint {
    pub fn new(ledger: Ledger, history: Vec<HistoryEntry>, event_sequence: u64) -> Self {
        Self {
            session_id: ledger.task().session_id,
            round_index: ledger.round_index(),
            ledger,
            history,
            event_sequence,
            saved_at: Utc::now(),
            end: None,
        }
    }

    /// Mark this checkpoint as the session's last.
    pub fn with_end(mut self, end: Option<SessionEnd>) -> Self {
        self.end = end;
        self
    }

    pub fn is_final(&self) -> bool {
        self.end.is_some()
    }

    /// Keep only the most recent `limit` history entries.
    pub fn condense(history: &mut Vec<HistoryEntry>, limit: usize) {
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Decode a stored blob, refusing anything that does not describe `session_id`.
    pub fn from_blob(session_id: Uuid, blob: &[u8]) -> Result<Self> {
        let checkpoint: Checkpoint =
            serde_json::from_slice(blob).map_err(|e| CoreError::CorruptCheckpoint {
                session_id,
                reason: e.to_string(),
            })?;

        if checkpoint.session_id != session_id
            || checkpoint.ledger.task().session_id != session_id
        {
            return Err(CoreError::CorruptCheckpoint {
                session_id,
                reason: format!(
                    "checkpoint belongs to session {}",
                    checkpoint.session_id
                ),
            });
        }
        if checkpoint.round_index != checkpoint.ledger.round_index() {
            return Err(CoreError::CorruptCheckpoint {
                session_id,
                reason: format!(
                    "round index {} disagrees with ledger round {}",
                    checkpoint.round_index,
                    checkpoint.ledger.round_index()
                ),
            });
        }

        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PlanStep, StepOutcome, Task};

    fn committed_ledger() -> Ledger {
        let task = Task::new("summarize a document");
        let mut ledger = Ledger::new(
            task,
            vec![
                PlanStep::new(Capability::Research, "read it"),
                PlanStep::new(Capability::Analysis, "summarize"),
            ],
        );
        ledger.start_step(0).unwrap();
        ledger
            .record_outcome(
                0,
                StepOutcome::Succeeded {
                    facts: vec!["doc has 3 sections".to_string()],
                    done: false,
                },
            )
            .unwrap();
        ledger.evaluate_progress(3, 2);
        ledger.commit_round();
        ledger
    }

    #[test]
    fn test_blob_round_trip_preserves_ledger() {
        let ledger = committed_ledger();
        let checkpoint = Checkpoint::new(ledger.clone(), Vec::new(), 1);

        let blob = checkpoint.to_blob().unwrap();
        let restored = Checkpoint::from_blob(checkpoint.session_id, &blob).unwrap();

        assert_eq!(restored, checkpoint);
        assert_eq!(restored.ledger, ledger);
        assert_eq!(restored.round_index, 1);
    }

    #[test]
    fn test_final_checkpoint_keeps_end() {
        let checkpoint = Checkpoint::new(committed_ledger(), Vec::new(), 1).with_end(Some(
            SessionEnd::Failed {
                reason: "no progress after 2 replans".to_string(),
            },
        ));
        assert!(checkpoint.is_final());

        let blob = checkpoint.to_blob().unwrap();
        let restored = Checkpoint::from_blob(checkpoint.session_id, &blob).unwrap();
        assert_eq!(restored.end, checkpoint.end);
        assert_eq!(restored.end.as_ref().map(SessionEnd::as_str), Some("failed"));
    }

    #[test]
    fn test_blob_without_end_is_not_final() {
        let checkpoint = Checkpoint::new(committed_ledger(), Vec::new(), 1);
        let blob = checkpoint.to_blob().unwrap();
        assert!(!String::from_utf8_lossy(&blob).contains("\"end\""));

        let restored = Checkpoint::from_blob(checkpoint.session_id, &blob).unwrap();
        assert!(!restored.is_final());
    }

    #[test]
    fn test_garbage_blob_is_corrupt() {
        let result = Checkpoint::from_blob(Uuid::new_v4(), b"{\"session_id\":");
        assert!(matches!(result, Err(CoreError::CorruptCheckpoint { .. })));
    }

    #[test]
    fn test_foreign_session_is_corrupt() {
        let checkpoint = Checkpoint::new(committed_ledger(), Vec::new(), 1);
        let blob = checkpoint.to_blob().unwrap();
        let result = Checkpoint::from_blob(Uuid::new_v4(), &blob);
        assert!(matches!(result, Err(CoreError::CorruptCheckpoint { .. })));
    }

    #[test]
    fn test_condense_keeps_latest() {
        let mut history: Vec<HistoryEntry> = (1..=5)
            .map(|round| HistoryEntry {
                round,
                step_index: None,
                capability: None,
                summary: format!("round {round}"),
            })
            .collect();

        Checkpoint::condense(&mut history, 2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].round, 4);
        assert_eq!(history[1].round, 5);
    }
}
