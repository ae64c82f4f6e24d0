use crate::domain::{ApprovalStatus, StepStatus};
use crate::error::{CoreError, Result};

pub struct StepStateMachine;

impl StepStateMachine {
    pub fn validate_transition(from: &StepStatus, to: &StepStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidStatusTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &StepStatus) -> Vec<StepStatus> {
        match from {
            StepStatus::Pending => vec![StepStatus::InProgress],
            // Back to Pending when a round deadline interrupts dispatch.
            StepStatus::InProgress => vec![
                StepStatus::Pending,
                StepStatus::Succeeded,
                StepStatus::Failed,
                StepStatus::Rejected,
            ],
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Rejected => vec![],
        }
    }

    pub fn can_transition(from: &StepStatus, to: &StepStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

/// Approval requests only ever leave `Pending`; nothing re-enters it.
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    pub fn validate_transition(from: &ApprovalStatus, to: &ApprovalStatus) -> Result<()> {
        if *from == ApprovalStatus::Pending && *to != ApprovalStatus::Pending {
            Ok(())
        } else {
            Err(CoreError::InvalidStatusTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    pub fn can_transition(from: &ApprovalStatus, to: &ApprovalStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}
