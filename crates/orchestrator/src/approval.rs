//! Human-in-the-loop approval gate.
//!
//! Side-effecting executor actions are parked here until an external decision
//! arrives. Every state change of a request happens under the gate's lock and
//! is announced on the owning session's event stream, so `approval.requested`
//! always precedes the matching `approval.resolved`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use events::{Actor, Event};
use fleet_core::{ApprovalRequest, ApprovalStatus, Decision};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ApprovalConfig, TimeoutPolicy};
use crate::core::EventEmitter;

struct PendingApproval {
    request: ApprovalRequest,
    emitter: EventEmitter,
    responder: oneshot::Sender<ApprovalRequest>,
}

/// Handle held by the session waiting on a request.
pub struct ApprovalTicket {
    request: ApprovalRequest,
    receiver: oneshot::Receiver<ApprovalRequest>,
}

impl ApprovalTicket {
    pub fn request_id(&self) -> Uuid {
        self.request.id
    }

    pub fn request(&self) -> &ApprovalRequest {
        &self.request
    }
}

/// Shared across sessions; resolved requests are not retained.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    pending: Arc<Mutex<HashMap<Uuid, PendingApproval>>>,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingApproval>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending request and announce it.
    pub fn open(&self, request: ApprovalRequest, emitter: &EventEmitter) -> ApprovalTicket {
        let (responder, receiver) = oneshot::channel();
        let mut pending = self.lock();

        info!(
            session_id = %request.session_id,
            request_id = %request.id,
            step_index = request.step_index,
            risk = request.action.risk.as_str(),
            "Approval requested"
        );
        emitter.emit(
            Actor::ApprovalGate,
            Event::ApprovalRequested {
                request_id: request.id,
                step_index: request.step_index,
                capability: request.capability.to_string(),
                summary: request.action.summary.clone(),
                risk: request.action.risk.as_str().to_string(),
                payload: request.action.payload.clone(),
            },
        );
        pending.insert(
            request.id,
            PendingApproval {
                request: request.clone(),
                emitter: emitter.clone(),
                responder,
            },
        );

        ApprovalTicket { request, receiver }
    }

    /// Deliver an external decision.
    ///
    /// Returns false, with no effect, when the request is unknown, belongs to
    /// another session, or was already resolved.
    pub fn submit_decision(&self, session_id: Uuid, request_id: Uuid, decision: Decision) -> bool {
        let mut pending = self.lock();
        let owned = pending
            .get(&request_id)
            .is_some_and(|entry| entry.request.session_id == session_id);
        if !owned {
            debug!(
                session_id = %session_id,
                request_id = %request_id,
                "Decision ignored: request is not pending"
            );
            return false;
        }

        match pending.remove(&request_id) {
            Some(entry) => {
                Self::finish(entry, decision.as_status());
                true
            }
            None => false,
        }
    }

    /// Resolve every pending request of a session as superseded.
    pub fn supersede_session(&self, session_id: Uuid) -> usize {
        let mut pending = self.lock();
        let ids: Vec<Uuid> = pending
            .values()
            .filter(|entry| entry.request.session_id == session_id)
            .map(|entry| entry.request.id)
            .collect();

        for id in &ids {
            if let Some(entry) = pending.remove(id) {
                Self::finish(entry, ApprovalStatus::Superseded);
            }
        }
        ids.len()
    }

    pub fn pending(&self, session_id: Uuid) -> Vec<ApprovalRequest> {
        self.lock()
            .values()
            .filter(|entry| entry.request.session_id == session_id)
            .map(|entry| entry.request.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Wait for the ticket's request to leave the pending state.
    ///
    /// On deadline the configured [`TimeoutPolicy`] applies. Dropping the
    /// returned future leaves the request pending until it is superseded.
    pub async fn wait(&self, ticket: ApprovalTicket, config: &ApprovalConfig) -> ApprovalRequest {
        let ApprovalTicket {
            request,
            mut receiver,
        } = ticket;

        match tokio::time::timeout(config.timeout(), &mut receiver).await {
            Ok(Ok(resolved)) => return resolved,
            Ok(Err(_)) => return Self::abandoned(request),
            Err(_) => {}
        }

        match config.on_timeout {
            TimeoutPolicy::Deny => {
                self.expire(request.id);
            }
            TimeoutPolicy::Escalate => {
                self.escalate(request.id);
            }
        }

        match receiver.await {
            Ok(resolved) => resolved,
            Err(_) => Self::abandoned(request),
        }
    }

    fn expire(&self, request_id: Uuid) -> bool {
        let mut pending = self.lock();
        match pending.remove(&request_id) {
            Some(entry) => {
                Self::finish(entry, ApprovalStatus::TimedOut);
                true
            }
            None => false,
        }
    }

    fn escalate(&self, request_id: Uuid) -> bool {
        let pending = self.lock();
        let Some(entry) = pending.get(&request_id) else {
            return false;
        };
        warn!(
            session_id = %entry.request.session_id,
            request_id = %request_id,
            "Approval deadline elapsed, escalating"
        );
        entry
            .emitter
            .emit(Actor::ApprovalGate, Event::ApprovalEscalated { request_id });
        true
    }

    fn finish(entry: PendingApproval, status: ApprovalStatus) {
        let PendingApproval {
            mut request,
            emitter,
            responder,
        } = entry;

        if let Err(e) = request.resolve(status) {
            warn!(request_id = %request.id, error = %e, "Approval already resolved");
            return;
        }
        info!(
            session_id = %request.session_id,
            request_id = %request.id,
            status = status.as_str(),
            "Approval resolved"
        );
        emitter.emit(
            Actor::ApprovalGate,
            Event::ApprovalResolved {
                request_id: request.id,
                status: status.as_str().to_string(),
            },
        );
        // The waiter is gone when its session was cancelled.
        let _ = responder.send(request);
    }

    fn abandoned(mut request: ApprovalRequest) -> ApprovalRequest {
        if request.is_pending() {
            let _ = request.resolve(ApprovalStatus::Superseded);
        }
        request
    }
}
