//! Session-scoped event emitter.
//!
//! Wraps a [`SessionPublisher`] and remembers whether the session already
//! published its terminal event, so lifecycle guards never emit a second one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use events::{Actor, Event, SessionPublisher, Subscription};
use tracing::trace;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct EventEmitter {
    publisher: SessionPublisher,
    terminal_emitted: Arc<AtomicBool>,
    rounds: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new(publisher: SessionPublisher) -> Self {
        Self {
            publisher,
            terminal_emitted: Arc::new(AtomicBool::new(false)),
            rounds: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.publisher.session_id()
    }

    /// Publish an event and return its sequence number.
    ///
    /// Returns `None` when the session already terminated; the rejection is
    /// logged by the publisher.
    pub fn emit(&self, actor: Actor, event: Event) -> Option<u64> {
        if let Event::RoundCompleted { round, .. } = event {
            self.rounds.store(round, Ordering::SeqCst);
        }
        let terminal = event.is_terminal();
        let kind = event.kind();
        let envelope = self.publisher.publish(actor, event).ok()?;
        if terminal {
            self.terminal_emitted.store(true, Ordering::SeqCst);
        }
        trace!(
            session_id = %envelope.session_id,
            sequence = envelope.sequence,
            kind,
            "Event emitted"
        );
        Some(envelope.sequence)
    }

    pub fn orchestrator(&self, event: Event) -> Option<u64> {
        self.emit(Actor::Orchestrator, event)
    }

    /// Sequence number the next event will carry.
    pub fn next_sequence(&self) -> u64 {
        self.publisher.next_sequence()
    }

    /// Continue numbering after a sequence restored from a checkpoint.
    pub fn resume_after(&self, sequence: u64, rounds: u64) {
        self.publisher.resume_after(sequence);
        self.rounds.store(rounds, Ordering::SeqCst);
    }

    pub fn terminal_emitted(&self) -> bool {
        self.terminal_emitted.load(Ordering::SeqCst) || self.publisher.is_terminated()
    }

    /// Last committed round announced through this emitter.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }
}
