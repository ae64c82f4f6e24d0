//! Multi-session supervisor.
//!
//! Every session runs in its own background task with its own cancellation
//! token. The manager is the external surface for decisions, cancellation and
//! event subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use events::{EventBus, SessionPublisher, Subscription};
use fleet_core::{ApprovalRequest, Decision, Task};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::{Orchestrator, OrchestratorDeps, SessionOutcome};
use crate::error::{OrchestratorError, Result};
use crate::resources::SessionGuard;

type Registry = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

fn lock(sessions: &Registry) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a running session.
pub struct SessionHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to reach its terminal state.
    pub async fn wait(self) -> Result<SessionOutcome> {
        self.join
            .await
            .map_err(|e| OrchestratorError::ExecutionFailed(format!("session task failed: {e}")))
    }
}

/// Removes the session from the active set and releases its bus channel when
/// its task ends, even by panic.
struct ActiveSession {
    sessions: Registry,
    bus: EventBus,
    session_id: Uuid,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        lock(&self.sessions).remove(&self.session_id);
        self.bus.forget(self.session_id);
        debug!(session_id = %self.session_id, "Session deregistered");
    }
}

#[derive(Clone)]
pub struct SessionManager {
    deps: OrchestratorDeps,
    bus: EventBus,
    sessions: Registry,
}

impl SessionManager {
    pub fn new(deps: OrchestratorDeps, bus: EventBus) -> Self {
        Self {
            deps,
            bus,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Event bus sized from the configured queue capacity and overflow policy.
    pub fn with_configured_bus(deps: OrchestratorDeps) -> Self {
        let bus = EventBus::with_config(
            deps.config.events.queue_capacity,
            deps.config.events.overflow,
        );
        Self::new(deps, bus)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn deps(&self) -> &OrchestratorDeps {
        &self.deps
    }

    /// Start a session for `task`, continuing from its checkpoint if one exists.
    pub async fn start(&self, task: Task) -> Result<SessionHandle> {
        let session_id = task.session_id;
        let cancel = self.reserve(session_id)?;

        match Orchestrator::open(task, self.publisher(session_id), self.deps.clone()).await {
            Ok(orchestrator) => Ok(self.spawn(orchestrator, cancel)),
            Err(e) => {
                self.release(session_id);
                Err(e)
            }
        }
    }

    /// Resume a previously checkpointed session.
    pub async fn resume(&self, session_id: Uuid) -> Result<SessionHandle> {
        let cancel = self.reserve(session_id)?;

        match Orchestrator::resume(session_id, self.publisher(session_id), self.deps.clone()).await
        {
            Ok(orchestrator) => Ok(self.spawn(orchestrator, cancel)),
            Err(e) => {
                self.release(session_id);
                Err(e)
            }
        }
    }

    fn reserve(&self, session_id: Uuid) -> Result<CancellationToken> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(&session_id) {
            return Err(OrchestratorError::SessionExists(session_id));
        }
        let token = CancellationToken::new();
        sessions.insert(session_id, token.clone());
        Ok(token)
    }

    /// Undo `reserve` for a session that never started.
    fn release(&self, session_id: Uuid) {
        lock(&self.sessions).remove(&session_id);
        self.bus.forget(session_id);
    }

    fn publisher(&self, session_id: Uuid) -> SessionPublisher {
        // A finished run of the same session leaves a terminated channel behind.
        if self.bus.is_terminated(session_id) {
            self.bus.forget(session_id);
        }
        self.bus.publisher(session_id)
    }

    fn spawn(&self, orchestrator: Orchestrator, cancel: CancellationToken) -> SessionHandle {
        let session_id = orchestrator.session_id();
        let emitter = orchestrator.emitter().clone();
        let active = ActiveSession {
            sessions: self.sessions.clone(),
            bus: self.bus.clone(),
            session_id,
        };
        let token = cancel.clone();

        // `_active` drops after `guard`, so the terminal event is out before
        // the channel is released.
        let join = tokio::spawn(async move {
            let _active = active;
            let mut guard = SessionGuard::new(emitter);
            let outcome = orchestrator.run(token).await;
            guard.mark_completed();
            outcome
        });

        info!(session_id = %session_id, "Session started");
        SessionHandle {
            session_id,
            cancel,
            join,
        }
    }

    /// Request cancellation. Returns false if the session is not running.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match lock(&self.sessions).get(&session_id) {
            Some(token) => {
                info!(session_id = %session_id, "Cancelling session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running session.
    pub fn shutdown(&self) {
        for token in lock(&self.sessions).values() {
            token.cancel();
        }
    }

    /// Deliver an approval decision. Returns false if the request was not pending.
    pub fn submit_decision(&self, session_id: Uuid, request_id: Uuid, decision: Decision) -> bool {
        self.deps.gate.submit_decision(session_id, request_id, decision)
    }

    pub fn pending_approvals(&self, session_id: Uuid) -> Vec<ApprovalRequest> {
        self.deps.gate.pending(session_id)
    }

    pub fn subscribe(&self, session_id: Uuid) -> Subscription {
        self.bus.subscribe(session_id)
    }

    pub fn active_sessions(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = lock(&self.sessions).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, session_id: Uuid) -> bool {
        lock(&self.sessions).contains_key(&session_id)
    }
}
