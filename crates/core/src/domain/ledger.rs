//! Per-session task ledger and progress evaluation.
//!
//! The ledger is the authoritative record of a session: recorded facts, the
//! current plan and the counters that decide whether the loop continues,
//! replans, completes or gives up.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::plan::{PlanStep, StepStatus};
use super::task::Task;
use crate::error::{CoreError, Result};
use crate::state_machine::StepStateMachine;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// New information produced by a successful step. Only these reset stalling.
    Progress,
    /// A step exhausted its retries or failed permanently.
    Failure,
    /// A step was denied (or timed out) at the approval gate.
    Rejection,
    Note,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Failure => "failure",
            Self::Rejection => "rejection",
            Self::Note => "note",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fact {
    /// Round in which the fact was recorded (1-based).
    pub round: u64,
    pub step_index: Option<usize>,
    pub kind: FactKind,
    pub text: String,
}

/// What happened to a dispatched step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { facts: Vec<String>, done: bool },
    Failed { reason: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ProgressDecision {
    Continue,
    Replan,
    Complete,
    Fail,
}

impl ProgressDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Replan => "replan",
            Self::Complete => "complete",
            Self::Fail => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Fail)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    task: Task,
    facts: Vec<Fact>,
    plan: Vec<PlanStep>,
    round_index: u64,
    stall_count: u32,
    replan_count: u32,
    /// Progress facts recorded since the last evaluation.
    pending_progress: u32,
    done_signalled: bool,
}

impl Ledger {
    pub fn new(task: Task, plan: Vec<PlanStep>) -> Self {
        Self {
            task,
            facts: Vec::new(),
            plan,
            round_index: 0,
            stall_count: 0,
            replan_count: 0,
            pending_progress: 0,
            done_signalled: false,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn plan(&self) -> &[PlanStep] {
        &self.plan
    }

    pub fn round_index(&self) -> u64 {
        self.round_index
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    pub fn replan_count(&self) -> u32 {
        self.replan_count
    }

    pub fn progress_facts(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().filter(|f| f.kind == FactKind::Progress)
    }

    /// First pending step in plan order.
    pub fn next_pending_step(&self) -> Option<usize> {
        self.plan
            .iter()
            .position(|step| step.status == StepStatus::Pending)
    }

    pub fn step(&self, index: usize) -> Result<&PlanStep> {
        let len = self.plan.len();
        self.plan
            .get(index)
            .ok_or(CoreError::StepOutOfRange { index, len })
    }

    fn transition_step(&mut self, index: usize, to: StepStatus) -> Result<()> {
        let len = self.plan.len();
        let step = self
            .plan
            .get_mut(index)
            .ok_or(CoreError::StepOutOfRange { index, len })?;
        StepStateMachine::validate_transition(&step.status, &to)?;
        step.status = to;
        Ok(())
    }

    pub fn start_step(&mut self, index: usize) -> Result<()> {
        self.transition_step(index, StepStatus::InProgress)
    }

    /// Return an interrupted step to the pending pool without recording anything.
    pub fn release_step(&mut self, index: usize) -> Result<()> {
        self.transition_step(index, StepStatus::Pending)
    }

    /// Record the outcome of a dispatched step.
    ///
    /// Returns the number of new progress facts. Progress facts that repeat an
    /// already recorded progress fact are not counted as new.
    pub fn record_outcome(&mut self, index: usize, outcome: StepOutcome) -> Result<usize> {
        let round = self.round_index + 1;
        match outcome {
            StepOutcome::Succeeded { facts, done } => {
                self.transition_step(index, StepStatus::Succeeded)?;
                let mut added = 0;
                for text in facts {
                    let duplicate = self
                        .progress_facts()
                        .any(|existing| existing.text == text);
                    if duplicate || text.trim().is_empty() {
                        continue;
                    }
                    self.facts.push(Fact {
                        round,
                        step_index: Some(index),
                        kind: FactKind::Progress,
                        text,
                    });
                    added += 1;
                }
                self.pending_progress += added as u32;
                self.done_signalled |= done;
                Ok(added)
            }
            StepOutcome::Failed { reason } => {
                self.transition_step(index, StepStatus::Failed)?;
                self.push_fact(round, Some(index), FactKind::Failure, reason);
                Ok(0)
            }
            StepOutcome::Rejected { reason } => {
                self.transition_step(index, StepStatus::Rejected)?;
                self.push_fact(round, Some(index), FactKind::Rejection, reason);
                Ok(0)
            }
        }
    }

    fn record_note(&mut self, text: impl Into<String>) {
        let round = self.round_index + 1;
        self.push_fact(round, None, FactKind::Note, text.into());
    }

    fn push_fact(&mut self, round: u64, step_index: Option<usize>, kind: FactKind, text: String) {
        self.facts.push(Fact {
            round,
            step_index,
            kind,
            text,
        });
    }

    /// Whether the plan's exit condition holds.
    pub fn is_complete(&self) -> bool {
        self.done_signalled
            || (!self.plan.is_empty()
                && self
                    .plan
                    .iter()
                    .all(|step| step.status == StepStatus::Succeeded))
    }

    /// Decide what the loop does after a round.
    ///
    /// Progress resets the stall counter. Without progress the stall counter
    /// grows until it reaches `stall_threshold`, at which point a replan is
    /// requested, or the session fails once `max_replans` replans were spent.
    pub fn evaluate_progress(&mut self, stall_threshold: u32, max_replans: u32) -> ProgressDecision {
        let made_progress = self.pending_progress > 0;
        self.pending_progress = 0;

        if self.is_complete() {
            self.stall_count = 0;
            return ProgressDecision::Complete;
        }

        if made_progress {
            self.stall_count = 0;
            return ProgressDecision::Continue;
        }

        self.stall_count += 1;
        debug!(
            session_id = %self.task.session_id,
            stall_count = self.stall_count,
            stall_threshold,
            "Round made no progress"
        );

        if self.stall_count < stall_threshold {
            return ProgressDecision::Continue;
        }

        self.stall_count = 0;
        if self.replan_count >= max_replans {
            return ProgressDecision::Fail;
        }
        self.replan_count += 1;
        ProgressDecision::Replan
    }

    /// Swap in a regenerated plan. Facts and counters are kept, and a note
    /// records the replacement for later planners.
    pub fn replace_plan(&mut self, plan: Vec<PlanStep>) {
        let note = format!(
            "plan replaced with {} steps (replan {})",
            plan.len(),
            self.replan_count
        );
        self.plan = plan;
        self.done_signalled = false;
        self.record_note(note);
    }

    /// Mark the current round as committed and return its index.
    pub fn commit_round(&mut self) -> u64 {
        self.round_index += 1;
        self.round_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Capability;

    fn ledger_with(steps: usize) -> Ledger {
        let plan = (0..steps)
            .map(|i| PlanStep::new(Capability::Research, format!("step {i}")))
            .collect();
        Ledger::new(Task::new("goal"), plan)
    }

    fn succeed(ledger: &mut Ledger, index: usize, fact: &str) -> usize {
        ledger.start_step(index).unwrap();
        ledger
            .record_outcome(
                index,
                StepOutcome::Succeeded {
                    facts: vec![fact.to_string()],
                    done: false,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_next_pending_step_in_plan_order() {
        let mut ledger = ledger_with(3);
        assert_eq!(ledger.next_pending_step(), Some(0));

        succeed(&mut ledger, 0, "a");
        assert_eq!(ledger.next_pending_step(), Some(1));
    }

    #[test]
    fn test_progress_resets_stall_counter() {
        let mut ledger = ledger_with(3);
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Continue);
        assert_eq!(ledger.stall_count(), 1);

        succeed(&mut ledger, 0, "found something");
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Continue);
        assert_eq!(ledger.stall_count(), 0);
    }

    #[test]
    fn test_stall_threshold_triggers_exactly_one_replan() {
        let mut ledger = ledger_with(1);

        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Continue);
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Continue);
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Replan);
        assert_eq!(ledger.replan_count(), 1);
        assert_eq!(ledger.stall_count(), 0);

        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Continue);
    }

    #[test]
    fn test_replan_cap_fails_session() {
        let mut ledger = ledger_with(1);
        let mut decisions = Vec::new();
        for _ in 0..4 {
            decisions.push(ledger.evaluate_progress(2, 1));
        }
        assert_eq!(
            decisions,
            vec![
                ProgressDecision::Continue,
                ProgressDecision::Replan,
                ProgressDecision::Continue,
                ProgressDecision::Fail,
            ]
        );
        assert_eq!(ledger.replan_count(), 1);
    }

    #[test]
    fn test_failure_fact_is_not_progress() {
        let mut ledger = ledger_with(2);
        ledger.start_step(0).unwrap();
        let added = ledger
            .record_outcome(
                0,
                StepOutcome::Failed {
                    reason: "gave up after 4 attempts".to_string(),
                },
            )
            .unwrap();

        assert_eq!(added, 0);
        assert_eq!(ledger.facts().len(), 1);
        assert_eq!(ledger.facts()[0].kind, FactKind::Failure);
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Continue);
        assert_eq!(ledger.stall_count(), 1);
    }

    #[test]
    fn test_duplicate_progress_fact_is_not_new() {
        let mut ledger = ledger_with(2);
        assert_eq!(succeed(&mut ledger, 0, "same"), 1);
        ledger.evaluate_progress(3, 2);
        assert_eq!(succeed(&mut ledger, 1, "same"), 0);
    }

    #[test]
    fn test_all_steps_succeeded_completes() {
        let mut ledger = ledger_with(1);
        succeed(&mut ledger, 0, "summary");
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Complete);
    }

    #[test]
    fn test_done_signal_completes_early() {
        let mut ledger = ledger_with(3);
        ledger.start_step(0).unwrap();
        ledger
            .record_outcome(
                0,
                StepOutcome::Succeeded {
                    facts: vec!["answer".to_string()],
                    done: true,
                },
            )
            .unwrap();
        assert_eq!(ledger.evaluate_progress(3, 2), ProgressDecision::Complete);
    }

    #[test]
    fn test_rejection_marks_step() {
        let mut ledger = ledger_with(1);
        ledger.start_step(0).unwrap();
        ledger
            .record_outcome(
                0,
                StepOutcome::Rejected {
                    reason: "denied".to_string(),
                },
            )
            .unwrap();
        assert_eq!(ledger.plan()[0].status, StepStatus::Rejected);
        assert_eq!(ledger.next_pending_step(), None);
    }

    #[test]
    fn test_record_requires_in_progress() {
        let mut ledger = ledger_with(1);
        let result = ledger.record_outcome(
            0,
            StepOutcome::Succeeded {
                facts: vec![],
                done: false,
            },
        );
        assert!(matches!(
            result,
            Err(CoreError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn test_release_returns_step_to_pending() {
        let mut ledger = ledger_with(1);
        ledger.start_step(0).unwrap();
        ledger.release_step(0).unwrap();
        assert_eq!(ledger.next_pending_step(), Some(0));
        assert!(ledger.facts().is_empty());
    }

    #[test]
    fn test_replace_plan_records_note() {
        let mut ledger = ledger_with(1);
        assert_eq!(ledger.evaluate_progress(1, 3), ProgressDecision::Replan);

        ledger.replace_plan(vec![PlanStep::new(Capability::Analysis, "retry")]);

        let note = ledger.facts().last().unwrap();
        assert_eq!(note.kind, FactKind::Note);
        assert_eq!(note.round, 1);
        assert_eq!(note.step_index, None);
        assert_eq!(note.text, "plan replaced with 1 steps (replan 1)");
        assert_eq!(ledger.progress_facts().count(), 0);
        assert_eq!(ledger.next_pending_step(), Some(0));
    }

    #[test]
    fn test_commit_round_increments_by_one() {
        let mut ledger = ledger_with(1);
        assert_eq!(ledger.round_index(), 0);
        assert_eq!(ledger.commit_round(), 1);
        assert_eq!(ledger.commit_round(), 2);
    }

    #[test]
    fn test_out_of_range_step() {
        let mut ledger = ledger_with(1);
        assert!(matches!(
            ledger.start_step(5),
            Err(CoreError::StepOutOfRange { index: 5, len: 1 })
        ));
    }
}
