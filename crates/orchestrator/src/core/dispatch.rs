//! Step dispatch: executor invocation, retries and the approval handshake.

use std::sync::Arc;
use std::time::Duration;

use events::Event;
use fleet_core::{ActionDescriptor, ApprovalRequest, ApprovalStatus, PlanStep, StepOutcome};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::ApprovalGate;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::executor::{ExecutorRegistry, ExecutorRequest, ExecutorResult, RegisteredExecutor};
use crate::resources::AdmissionBudget;

use super::events::EventEmitter;

/// How a dispatched step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// `output` is the executor's structured result for a succeeded step.
    Finished {
        outcome: StepOutcome,
        output: serde_json::Value,
    },
    /// The round deadline elapsed before the executor answered.
    DeadlineExceeded,
}

impl Dispatch {
    fn finished(outcome: StepOutcome) -> Self {
        Self::Finished {
            outcome,
            output: serde_json::Value::Null,
        }
    }
}

/// Runs one plan step against its executor.
///
/// The round deadline covers executor attempts and retry backoff. Time spent
/// waiting for an approval decision is not charged against it.
pub struct DispatchEngine {
    registry: Arc<ExecutorRegistry>,
    gate: ApprovalGate,
    budget: AdmissionBudget,
    config: Arc<OrchestratorConfig>,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        gate: ApprovalGate,
        budget: AdmissionBudget,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            registry,
            gate,
            budget,
            config,
        }
    }

    pub async fn dispatch(
        &self,
        session_id: Uuid,
        step_index: usize,
        step: &PlanStep,
        facts: Vec<String>,
        emitter: &EventEmitter,
    ) -> Result<Dispatch> {
        let Some(entry) = self.registry.resolve(step.capability) else {
            return Ok(Dispatch::finished(StepOutcome::Failed {
                reason: format!("no executor registered for {}", step.capability),
            }));
        };

        info!(
            session_id = %session_id,
            step_index,
            capability = %step.capability,
            "Dispatching step"
        );

        let mut remaining = self.config.round_deadline();
        let mut approved: Option<ActionDescriptor> = None;

        loop {
            let request = ExecutorRequest {
                session_id,
                step_index,
                capability: step.capability,
                description: step.description.clone(),
                facts: facts.clone(),
                tools: entry.descriptor.tools.clone(),
                approved_action: approved.clone(),
            };

            let started = Instant::now();
            let result = match tokio::time::timeout(
                remaining,
                self.invoke_with_retry(entry, request, emitter),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        session_id = %session_id,
                        step_index,
                        deadline_secs = self.config.round_deadline_secs,
                        "Round deadline exceeded"
                    );
                    return Ok(Dispatch::DeadlineExceeded);
                }
            };
            remaining = remaining.saturating_sub(started.elapsed());

            let action = match result {
                ExecutorResult::Success {
                    facts,
                    done,
                    payload,
                } => {
                    return Ok(Dispatch::Finished {
                        outcome: StepOutcome::Succeeded { facts, done },
                        output: payload,
                    });
                }
                ExecutorResult::Error { message, retryable } => {
                    let reason = if retryable {
                        format!(
                            "gave up after {} attempts: {message}",
                            entry.descriptor.max_attempts()
                        )
                    } else {
                        message
                    };
                    return Ok(Dispatch::finished(StepOutcome::Failed { reason }));
                }
                ExecutorResult::NeedsApproval { action } => action,
            };

            if approved.is_some() {
                return Ok(Dispatch::finished(StepOutcome::Failed {
                    reason: "executor requested approval again for an approved step".to_string(),
                }));
            }

            let ticket = self.gate.open(
                ApprovalRequest::new(session_id, step_index, step.capability, action.clone()),
                emitter,
            );
            let resolved = self.gate.wait(ticket, &self.config.approval).await;

            match resolved.status {
                ApprovalStatus::Approved => {
                    debug!(session_id = %session_id, step_index, "Re-invoking approved step");
                    approved = Some(action);
                }
                status => {
                    return Ok(Dispatch::finished(StepOutcome::Rejected {
                        reason: format!("approval {}: {}", status.as_str(), action.summary),
                    }));
                }
            }
        }
    }

    /// Invoke the executor, retrying transient errors with a fixed backoff.
    ///
    /// Each attempt holds one admission permit for its duration.
    async fn invoke_with_retry(
        &self,
        entry: &RegisteredExecutor,
        request: ExecutorRequest,
        emitter: &EventEmitter,
    ) -> Result<ExecutorResult> {
        let max_attempts = entry.descriptor.max_attempts();
        let backoff: Duration = self.config.retry_backoff();
        let mut attempt = 1;

        loop {
            let permit = self.budget.acquire().await?;
            let result = entry.executor.invoke(request.clone()).await;
            drop(permit);

            match result {
                ExecutorResult::Error {
                    message,
                    retryable: true,
                } if attempt < max_attempts => {
                    warn!(
                        session_id = %request.session_id,
                        step_index = request.step_index,
                        attempt,
                        max_attempts,
                        error = %message,
                        "Transient executor error, retrying"
                    );
                    emitter.orchestrator(Event::StepRetrying {
                        step_index: request.step_index,
                        attempt,
                        max_attempts,
                        error: message,
                    });
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return Ok(other),
            }
        }
    }
}
