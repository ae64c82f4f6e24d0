//! Event types for the taskfleet event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Orchestrator,
    ApprovalGate,
}

/// Envelope wrapping all events with ordering metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EventEnvelope {
    /// Per-session sequence number, starting at 1
    pub sequence: u64,
    /// Session the event belongs to
    pub session_id: Uuid,
    /// Originating actor
    pub actor: Actor,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

/// All possible events in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Round events
    /// A round was committed (its checkpoint is durable)
    #[serde(rename = "round.completed")]
    RoundCompleted {
        round: u64,
        step_index: Option<usize>,
        capability: Option<String>,
        step_status: Option<String>,
        new_facts: usize,
        decision: String,
        /// Structured result reported by the executor of a succeeded step
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        #[cfg_attr(feature = "typescript", ts(type = "unknown"))]
        output: serde_json::Value,
    },

    /// A transient executor error is being retried
    #[serde(rename = "step.retrying")]
    StepRetrying {
        step_index: usize,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },

    /// The plan was regenerated after sustained stalling
    #[serde(rename = "plan.replanned")]
    PlanReplanned { replan_count: u32, steps: usize },

    // Approval events
    /// An executor action is waiting for an external decision
    #[serde(rename = "approval.requested")]
    ApprovalRequested {
        request_id: Uuid,
        step_index: usize,
        capability: String,
        summary: String,
        risk: String,
        #[cfg_attr(feature = "typescript", ts(type = "unknown"))]
        payload: serde_json::Value,
    },

    /// An approval request left the pending state
    #[serde(rename = "approval.resolved")]
    ApprovalResolved { request_id: Uuid, status: String },

    /// An approval wait deadline elapsed and the request was escalated
    #[serde(rename = "approval.escalated")]
    ApprovalEscalated { request_id: Uuid },

    // Terminal session events
    #[serde(rename = "session.completed")]
    SessionCompleted { rounds: u64 },

    #[serde(rename = "session.failed")]
    SessionFailed { rounds: u64, reason: String },

    #[serde(rename = "session.cancelled")]
    SessionCancelled { rounds: u64 },
}

impl Event {
    /// Terminal events end every subscription for their session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::SessionCompleted { .. }
                | Event::SessionFailed { .. }
                | Event::SessionCancelled { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::RoundCompleted { .. } => "round.completed",
            Event::StepRetrying { .. } => "step.retrying",
            Event::PlanReplanned { .. } => "plan.replanned",
            Event::ApprovalRequested { .. } => "approval.requested",
            Event::ApprovalResolved { .. } => "approval.resolved",
            Event::ApprovalEscalated { .. } => "approval.escalated",
            Event::SessionCompleted { .. } => "session.completed",
            Event::SessionFailed { .. } => "session.failed",
            Event::SessionCancelled { .. } => "session.cancelled",
        }
    }
}
