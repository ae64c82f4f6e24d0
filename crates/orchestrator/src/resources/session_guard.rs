//! RAII guard for session lifecycle management.
//!
//! Guarantees that every session ends with exactly one terminal event, even
//! when the task driving it panics or is aborted.

use events::Event;
use tracing::{debug, warn};

use crate::core::EventEmitter;

/// RAII guard for session lifecycle.
///
/// When this guard is dropped without being marked as completed and the
/// session has not published a terminal event yet, it publishes
/// `session.failed`.
///
/// # Example
///
/// ```ignore
/// let mut guard = SessionGuard::new(emitter.clone());
/// let outcome = orchestrator.run(cancel).await;
/// guard.mark_completed();
/// ```
pub struct SessionGuard {
    emitter: EventEmitter,
    completed: bool,
}

impl SessionGuard {
    pub fn new(emitter: EventEmitter) -> Self {
        debug!(session_id = %emitter.session_id(), "Session guard created");
        Self {
            emitter,
            completed: false,
        }
    }

    /// Mark the session as finished; the guard will not emit on drop.
    pub fn mark_completed(&mut self) {
        debug!(session_id = %self.emitter.session_id(), "Session marked as completed");
        self.completed = true;
    }

    fn emit_failure(&self, reason: &str) {
        if self.emitter.terminal_emitted() {
            return;
        }
        self.emitter.orchestrator(Event::SessionFailed {
            rounds: self.emitter.rounds(),
            reason: reason.to_string(),
        });
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                session_id = %self.emitter.session_id(),
                "Session guard dropped without completion - emitting failure"
            );
            self.emit_failure("session terminated unexpectedly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::EventBus;
    use uuid::Uuid;

    fn emitter() -> (EventBus, EventEmitter) {
        let bus = EventBus::new();
        let emitter = EventEmitter::new(bus.publisher(Uuid::new_v4()));
        (bus, emitter)
    }

    #[test]
    fn test_completed_guard_emits_nothing() {
        let (bus, emitter) = emitter();
        let session_id = emitter.session_id();
        let mut guard = SessionGuard::new(emitter);

        guard.mark_completed();
        drop(guard);

        assert_eq!(bus.last_sequence(session_id), 0);
        assert!(!bus.is_terminated(session_id));
    }

    #[test]
    fn test_dropped_guard_emits_failure() {
        let (bus, emitter) = emitter();
        let session_id = emitter.session_id();
        let mut subscription = bus.subscribe(session_id);

        drop(SessionGuard::new(emitter));

        let envelope = subscription.try_recv().unwrap();
        assert!(matches!(envelope.event, Event::SessionFailed { .. }));
        assert!(bus.is_terminated(session_id));
    }

    #[test]
    fn test_guard_does_not_duplicate_terminal() {
        let (bus, emitter) = emitter();
        let session_id = emitter.session_id();
        emitter.orchestrator(Event::SessionCancelled { rounds: 2 });

        drop(SessionGuard::new(emitter));

        assert_eq!(bus.last_sequence(session_id), 1);
    }
}
