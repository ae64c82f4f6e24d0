use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Capability;
use crate::error::Result;
use crate::state_machine::ApprovalStateMachine;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Denied,
    TimedOut,
    /// The owning session was cancelled while the request was pending.
    Superseded,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::TimedOut => "timed_out",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "timed_out" => Some(Self::TimedOut),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }
}

/// A decision delivered through the external approval channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
}

impl Decision {
    pub fn as_status(&self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Denied => ApprovalStatus::Denied,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// The side effect an executor wants to perform once authorized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDescriptor {
    pub summary: String,
    pub payload: serde_json::Value,
    pub risk: RiskClass,
}

impl ActionDescriptor {
    pub fn new(summary: impl Into<String>, payload: serde_json::Value, risk: RiskClass) -> Self {
        Self {
            summary: summary.into(),
            payload,
            risk,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub session_id: Uuid,
    pub step_index: usize,
    pub capability: Capability,
    pub action: ActionDescriptor,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        session_id: Uuid,
        step_index: usize,
        capability: Capability,
        action: ActionDescriptor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            step_index,
            capability,
            action,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn resolve(&mut self, to: ApprovalStatus) -> Result<()> {
        ApprovalStateMachine::validate_transition(&self.status, &to)?;
        self.status = to;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}
