//! The per-session planning loop.
//!
//! One [`Orchestrator`] owns one session's ledger. Each round selects the next
//! pending step, dispatches it, folds the outcome into the ledger, decides
//! whether to continue, replan, complete or fail, and commits the round by
//! writing a checkpoint before `round.completed` is published.

use std::sync::Arc;

use db::CheckpointStore;
use events::{Event, SessionPublisher};
use fleet_core::{
    Capability, Checkpoint, FactKind, HistoryEntry, Ledger, PlanStep, ProgressDecision,
    SessionEnd, StepStatus, Task,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::approval::ApprovalGate;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, PlanningError, Result};
use crate::executor::ExecutorRegistry;
use crate::memory::ContextMemory;
use crate::planner::Planner;
use crate::resources::AdmissionBudget;

use super::dispatch::{Dispatch, DispatchEngine};
use super::events::EventEmitter;

/// Collaborators shared by every session of a process.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub config: Arc<OrchestratorConfig>,
    pub registry: Arc<ExecutorRegistry>,
    pub planner: Arc<dyn Planner>,
    pub store: Arc<dyn CheckpointStore>,
    pub gate: ApprovalGate,
    pub budget: AdmissionBudget,
    pub memory: Option<Arc<dyn ContextMemory>>,
}

impl OrchestratorDeps {
    pub fn new(
        config: OrchestratorConfig,
        registry: ExecutorRegistry,
        planner: Arc<dyn Planner>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let budget = AdmissionBudget::new(config.admission.max_concurrent_calls);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            planner,
            store,
            gate: ApprovalGate::new(),
            budget,
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn ContextMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_budget(mut self, budget: AdmissionBudget) -> Self {
        self.budget = budget;
        self
    }
}

/// What a committed round did.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub round: u64,
    pub step_index: Option<usize>,
    pub capability: Option<Capability>,
    pub step_status: Option<StepStatus>,
    pub new_facts: usize,
    pub decision: ProgressDecision,
    /// Why the session fails, when `decision` is `Fail`.
    pub failure: Option<String>,
    /// Structured result of a succeeded step, `Null` otherwise.
    pub output: serde_json::Value,
}

impl RoundReport {
    fn summary(&self) -> String {
        match (self.step_index, self.capability, self.step_status) {
            (Some(index), Some(capability), Some(status)) => format!(
                "{capability} step {index} {}; {} new facts; {}",
                status.as_str(),
                self.new_facts,
                self.decision.as_str()
            ),
            _ => format!("no pending step; {}", self.decision.as_str()),
        }
    }

    fn session_end(&self) -> Option<SessionEnd> {
        match self.decision {
            ProgressDecision::Complete => Some(SessionEnd::Completed),
            ProgressDecision::Fail => Some(SessionEnd::Failed {
                reason: self.failure_reason(),
            }),
            ProgressDecision::Continue | ProgressDecision::Replan => None,
        }
    }

    fn failure_reason(&self) -> String {
        self.failure
            .clone()
            .unwrap_or_else(|| "session failed".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { rounds: u64 },
    Failed { rounds: u64, reason: String },
    Cancelled { rounds: u64 },
}

impl SessionOutcome {
    pub fn rounds(&self) -> u64 {
        match self {
            Self::Completed { rounds } | Self::Failed { rounds, .. } | Self::Cancelled { rounds } => {
                *rounds
            }
        }
    }

    fn event(&self) -> Event {
        match self {
            Self::Completed { rounds } => Event::SessionCompleted { rounds: *rounds },
            Self::Failed { rounds, reason } => Event::SessionFailed {
                rounds: *rounds,
                reason: reason.clone(),
            },
            Self::Cancelled { rounds } => Event::SessionCancelled { rounds: *rounds },
        }
    }
}

pub struct Orchestrator {
    ledger: Ledger,
    history: Vec<HistoryEntry>,
    deps: OrchestratorDeps,
    dispatcher: DispatchEngine,
    emitter: EventEmitter,
    write_failures: u32,
}

impl Orchestrator {
    /// Open a session for `task`.
    ///
    /// Resumes from the stored checkpoint when one exists. A corrupt
    /// checkpoint is discarded and the session starts over with a fresh plan.
    pub async fn open(task: Task, publisher: SessionPublisher, deps: OrchestratorDeps) -> Result<Self> {
        let session_id = task.session_id;
        if publisher.session_id() != session_id {
            return Err(OrchestratorError::SessionMismatch {
                expected: session_id,
                found: publisher.session_id(),
            });
        }
        let emitter = EventEmitter::new(publisher);

        match deps.store.load(session_id).await {
            Ok(Some(checkpoint)) => return Self::restore(checkpoint, emitter, deps),
            Ok(None) => {}
            Err(e) if e.is_corruption() => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Discarding corrupt checkpoint, starting from round 0"
                );
            }
            Err(e) => return Err(e.into()),
        }

        let plan = match Self::initial_plan(&task, &deps).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Initial planning failed");
                emitter.orchestrator(Event::SessionFailed {
                    rounds: 0,
                    reason: format!("planning failed: {e}"),
                });
                return Err(e.into());
            }
        };

        info!(
            session_id = %session_id,
            steps = plan.len(),
            "Session planned"
        );
        Ok(Self::assemble(Ledger::new(task, plan), Vec::new(), emitter, deps))
    }

    /// Resume a session that must have a checkpoint.
    pub async fn resume(
        session_id: Uuid,
        publisher: SessionPublisher,
        deps: OrchestratorDeps,
    ) -> Result<Self> {
        if publisher.session_id() != session_id {
            return Err(OrchestratorError::SessionMismatch {
                expected: session_id,
                found: publisher.session_id(),
            });
        }
        let checkpoint = deps
            .store
            .load(session_id)
            .await?
            .ok_or(OrchestratorError::SessionNotFound(session_id))?;
        Self::restore(checkpoint, EventEmitter::new(publisher), deps)
    }

    /// Continue from a checkpoint. A session whose final round is already
    /// checkpointed is not run again.
    fn restore(
        checkpoint: Checkpoint,
        emitter: EventEmitter,
        deps: OrchestratorDeps,
    ) -> Result<Self> {
        if let Some(end) = checkpoint.end {
            info!(
                session_id = %checkpoint.session_id,
                round = checkpoint.round_index,
                end = end.as_str(),
                "Session already finished, not resuming"
            );
            return Err(OrchestratorError::SessionFinished {
                session_id: checkpoint.session_id,
                rounds: checkpoint.round_index,
                end,
            });
        }

        info!(
            session_id = %checkpoint.session_id,
            round = checkpoint.round_index,
            event_sequence = checkpoint.event_sequence,
            "Resuming session from checkpoint"
        );
        emitter.resume_after(checkpoint.event_sequence, checkpoint.round_index);
        Ok(Self::assemble(
            checkpoint.ledger,
            checkpoint.history,
            emitter,
            deps,
        ))
    }

    fn assemble(
        ledger: Ledger,
        history: Vec<HistoryEntry>,
        emitter: EventEmitter,
        deps: OrchestratorDeps,
    ) -> Self {
        let dispatcher = DispatchEngine::new(
            deps.registry.clone(),
            deps.gate.clone(),
            deps.budget.clone(),
            deps.config.clone(),
        );
        Self {
            ledger,
            history,
            deps,
            dispatcher,
            emitter,
            write_failures: 0,
        }
    }

    async fn initial_plan(
        task: &Task,
        deps: &OrchestratorDeps,
    ) -> std::result::Result<Vec<PlanStep>, PlanningError> {
        let _permit = deps
            .budget
            .acquire()
            .await
            .map_err(|e| PlanningError::Unavailable(e.to_string()))?;
        let plan = deps.planner.plan(task).await?;
        deps.registry.validate_plan(&plan)?;
        Ok(plan)
    }

    pub fn session_id(&self) -> Uuid {
        self.ledger.task().session_id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Run one round, commit it, then hand its new facts to context memory.
    ///
    /// On error the ledger is left exactly as it was before the round and no
    /// event announcing the round is published.
    pub async fn run_round(&mut self) -> Result<RoundReport> {
        let report = self.commit_next_round().await?;
        self.remember_round(report.round).await;
        Ok(report)
    }

    /// The cancellable part of a round: everything up to `round.completed`.
    #[instrument(skip(self), fields(session_id = %self.session_id(), round = self.ledger.round_index() + 1))]
    async fn commit_next_round(&mut self) -> Result<RoundReport> {
        let ledger = self.ledger.clone();
        let history = self.history.clone();

        let result = self.execute_round().await;
        if result.is_err() {
            self.ledger = ledger;
            self.history = history;
        }
        result
    }

    async fn execute_round(&mut self) -> Result<RoundReport> {
        let session_id = self.session_id();
        let config = self.deps.config.clone();
        let round = self.ledger.round_index() + 1;

        let mut report = RoundReport {
            round,
            step_index: None,
            capability: None,
            step_status: None,
            new_facts: 0,
            decision: ProgressDecision::Continue,
            failure: None,
            output: serde_json::Value::Null,
        };

        match self.ledger.next_pending_step() {
            None => debug!("No pending step, round makes no progress"),
            Some(index) => {
                let step = self.ledger.step(index)?.clone();
                report.step_index = Some(index);
                report.capability = Some(step.capability);

                let facts = self.compose_context().await;
                self.ledger.start_step(index)?;
                match self
                    .dispatcher
                    .dispatch(session_id, index, &step, facts, &self.emitter)
                    .await?
                {
                    Dispatch::Finished { outcome, output } => {
                        report.new_facts = self.ledger.record_outcome(index, outcome)?;
                        report.output = output;
                    }
                    Dispatch::DeadlineExceeded => self.ledger.release_step(index)?,
                }
                report.step_status = Some(self.ledger.step(index)?.status);
            }
        }

        report.decision = self
            .ledger
            .evaluate_progress(config.stall_threshold, config.max_replans);
        let mut replanned = None;
        match report.decision {
            ProgressDecision::Fail => {
                report.failure = Some(format!(
                    "no progress after {} replans",
                    self.ledger.replan_count()
                ));
            }
            ProgressDecision::Replan => match self.replan().await {
                Ok(steps) => replanned = Some(steps),
                Err(e) => {
                    error!(error = %e, "Replanning failed");
                    report.decision = ProgressDecision::Fail;
                    report.failure = Some(format!("planning failed: {e}"));
                }
            },
            ProgressDecision::Continue | ProgressDecision::Complete => {}
        }
        if !report.decision.is_terminal() && round >= config.max_rounds {
            report.decision = ProgressDecision::Fail;
            report.failure = Some(format!("round limit of {} reached", config.max_rounds));
        }

        self.ledger.commit_round();
        self.history.push(HistoryEntry {
            round,
            step_index: report.step_index,
            capability: report.capability,
            summary: report.summary(),
        });
        Checkpoint::condense(&mut self.history, config.checkpoint.history_limit);

        let checkpoint = Checkpoint::new(
            self.ledger.clone(),
            self.history.clone(),
            self.emitter.next_sequence(),
        )
        .with_end(report.session_end());
        self.deps
            .store
            .save(session_id, &checkpoint)
            .await
            .map_err(|e| OrchestratorError::checkpoint_write(round, e.to_string()))?;

        self.emitter.orchestrator(Event::RoundCompleted {
            round,
            step_index: report.step_index,
            capability: report.capability.map(|c| c.to_string()),
            step_status: report.step_status.map(|s| s.as_str().to_string()),
            new_facts: report.new_facts,
            decision: report.decision.as_str().to_string(),
            output: report.output.clone(),
        });
        if let Some(steps) = replanned {
            self.emitter.orchestrator(Event::PlanReplanned {
                replan_count: self.ledger.replan_count(),
                steps,
            });
        }

        info!(
            step_index = ?report.step_index,
            new_facts = report.new_facts,
            decision = report.decision.as_str(),
            "Round committed"
        );
        Ok(report)
    }

    async fn replan(&mut self) -> std::result::Result<usize, PlanningError> {
        let _permit = self
            .deps
            .budget
            .acquire()
            .await
            .map_err(|e| PlanningError::Unavailable(e.to_string()))?;
        let plan = self.deps.planner.replan(&self.ledger).await?;
        self.deps.registry.validate_plan(&plan)?;

        let steps = plan.len();
        info!(
            replan_count = self.ledger.replan_count(),
            steps,
            "Plan regenerated"
        );
        self.ledger.replace_plan(plan);
        Ok(steps)
    }

    /// Facts handed to the executor: remembered facts the ledger no longer
    /// carries, then the ledger's progress facts, capped to the most recent.
    async fn compose_context(&self) -> Vec<String> {
        let mut facts: Vec<String> = Vec::new();

        if let Some(memory) = &self.deps.memory {
            match memory.fetch_facts(self.session_id()).await {
                Ok(remembered) => facts.extend(
                    remembered
                        .into_iter()
                        .filter(|fact| !self.ledger.progress_facts().any(|f| &f.text == fact)),
                ),
                Err(e) => warn!(error = %e, "Context memory unavailable"),
            }
        }
        facts.extend(self.ledger.progress_facts().map(|fact| fact.text.clone()));

        let limit = self.deps.config.max_context_facts;
        if facts.len() > limit {
            facts.drain(..facts.len() - limit);
        }
        facts
    }

    async fn remember_round(&self, round: u64) {
        let Some(memory) = &self.deps.memory else {
            return;
        };
        let learned: Vec<String> = self
            .ledger
            .facts()
            .iter()
            .filter(|fact| fact.round == round && fact.kind == FactKind::Progress)
            .map(|fact| fact.text.clone())
            .collect();
        if learned.is_empty() {
            return;
        }
        if let Err(e) = memory.store_facts(self.session_id(), &learned).await {
            warn!(error = %e, "Failed to store facts in context memory");
        }
    }

    /// Drive rounds until the session reaches a terminal state.
    ///
    /// Exactly one terminal event is published before this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionOutcome {
        let session_id = self.session_id();
        info!(
            session_id = %session_id,
            round = self.ledger.round_index(),
            "Session loop started"
        );

        if self.ledger.round_index() >= self.deps.config.max_rounds {
            let reason = format!("round limit of {} reached", self.deps.config.max_rounds);
            let rounds = self.emitter.rounds();
            return self.finish(SessionOutcome::Failed { rounds, reason });
        }

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.commit_next_round() => Some(result),
            };
            let Some(result) = result else {
                return self.finish_cancelled();
            };

            match result {
                Ok(report) => {
                    self.write_failures = 0;
                    // Committed rounds always reach context memory.
                    self.remember_round(report.round).await;
                    match report.decision {
                        ProgressDecision::Complete => {
                            return self.finish(SessionOutcome::Completed {
                                rounds: report.round,
                            });
                        }
                        ProgressDecision::Fail => {
                            return self.finish(SessionOutcome::Failed {
                                rounds: report.round,
                                reason: report
                                    .failure
                                    .unwrap_or_else(|| "session failed".to_string()),
                            });
                        }
                        ProgressDecision::Continue | ProgressDecision::Replan => {}
                    }
                }
                Err(OrchestratorError::CheckpointWrite { round, reason }) => {
                    self.write_failures += 1;
                    let limit = self.deps.config.checkpoint.max_write_failures;
                    warn!(
                        session_id = %session_id,
                        round,
                        failures = self.write_failures,
                        limit,
                        error = %reason,
                        "Checkpoint write failed, round will be retried"
                    );
                    if self.write_failures >= limit {
                        let rounds = self.emitter.rounds();
                        let reason = format!(
                            "checkpoint write failed {} times in a row: {reason}",
                            self.write_failures
                        );
                        return self.finish(SessionOutcome::Failed { rounds, reason });
                    }

                    let backoff = self.deps.config.retry_backoff();
                    let cancelled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(backoff) => false,
                    };
                    if cancelled {
                        return self.finish_cancelled();
                    }
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Round failed");
                    let rounds = self.emitter.rounds();
                    let reason = e.to_string();
                    return self.finish(SessionOutcome::Failed { rounds, reason });
                }
            }
        }
    }

    fn finish_cancelled(self) -> SessionOutcome {
        let superseded = self.deps.gate.supersede_session(self.session_id());
        info!(
            session_id = %self.session_id(),
            superseded,
            "Session cancelled"
        );
        let rounds = self.emitter.rounds();
        self.finish(SessionOutcome::Cancelled { rounds })
    }

    fn finish(self, outcome: SessionOutcome) -> SessionOutcome {
        info!(
            session_id = %self.session_id(),
            rounds = outcome.rounds(),
            outcome = ?outcome,
            "Session finished"
        );
        self.emitter.orchestrator(outcome.event());
        outcome
    }
}
