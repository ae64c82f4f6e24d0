//! Per-session event bus with bounded subscriber queues.
//!
//! Each session owns its own sequence counter and subscriber list. Publishing
//! is synchronous and never waits on a subscriber: a full queue is handled by
//! the configured [`OverflowPolicy`] instead.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EventError, Result};
use crate::types::{Actor, Event, EventEnvelope};

/// Default bound of each subscriber's delivery queue
const DEFAULT_CAPACITY: usize = 256;

/// What happens when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued event and keep delivering.
    #[default]
    DropOldest,
    /// Close the subscription; it ends without a terminal event.
    Disconnect,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SlotState {
    queue: VecDeque<EventEnvelope>,
    disconnected: bool,
    receiver_dropped: bool,
    dropped: u64,
}

struct Slot {
    state: Mutex<SlotState>,
    notify: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            notify: Notify::new(),
        }
    }

    fn closed() -> Self {
        let slot = Self::new();
        lock(&slot.state).disconnected = true;
        slot
    }

    /// Returns false once the slot should no longer receive events.
    fn deliver(&self, envelope: &EventEnvelope, capacity: usize, policy: OverflowPolicy) -> bool {
        let mut state = lock(&self.state);
        if state.receiver_dropped || state.disconnected {
            return false;
        }

        if state.queue.len() >= capacity {
            match policy {
                OverflowPolicy::DropOldest => {
                    state.queue.pop_front();
                    state.dropped += 1;
                }
                OverflowPolicy::Disconnect => {
                    state.disconnected = true;
                    state.queue.clear();
                    drop(state);
                    self.notify.notify_one();
                    return false;
                }
            }
        }

        state.queue.push_back(envelope.clone());
        drop(state);
        self.notify.notify_one();
        true
    }
}

#[derive(Default)]
struct ChannelState {
    last_sequence: u64,
    terminated: bool,
    subscribers: Vec<Arc<Slot>>,
}

struct BusInner {
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<ChannelState>>>>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Number of events published (for monitoring)
    event_count: AtomicUsize,
}

/// Shared event bus; every operation is scoped to one session.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new event bus with default capacity and drop-oldest overflow
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CAPACITY, OverflowPolicy::default())
    }

    /// Create a new event bus with the given per-subscriber queue bound and overflow policy
    pub fn with_config(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(BusInner {
                sessions: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                policy,
                event_count: AtomicUsize::new(0),
            }),
        }
    }

    fn channel(&self, session_id: Uuid) -> Arc<Mutex<ChannelState>> {
        lock(&self.inner.sessions)
            .entry(session_id)
            .or_default()
            .clone()
    }

    /// Like `channel`, but never registers an unknown session.
    fn existing(&self, session_id: Uuid) -> Option<Arc<Mutex<ChannelState>>> {
        lock(&self.inner.sessions).get(&session_id).cloned()
    }

    /// Handle bound to one session, handed to that session's orchestrator.
    pub fn publisher(&self, session_id: Uuid) -> SessionPublisher {
        SessionPublisher {
            bus: self.clone(),
            session_id,
        }
    }

    /// Assign the next sequence number and deliver to all current subscribers.
    ///
    /// Fails once the session has published its terminal event.
    pub fn publish(&self, session_id: Uuid, actor: Actor, event: Event) -> Result<EventEnvelope> {
        let channel = self.channel(session_id);
        let mut state = lock(&channel);

        if state.terminated {
            return Err(EventError::SessionTerminated(session_id));
        }

        state.last_sequence += 1;
        let envelope = EventEnvelope {
            sequence: state.last_sequence,
            session_id,
            actor,
            timestamp: Utc::now(),
            event,
        };

        let capacity = self.inner.capacity;
        let policy = self.inner.policy;
        state.subscribers.retain(|slot| {
            let keep = slot.deliver(&envelope, capacity, policy);
            if !keep {
                debug!(session_id = %session_id, "Subscriber removed");
            }
            keep
        });

        if envelope.event.is_terminal() {
            state.terminated = true;
            state.subscribers.clear();
        }

        self.inner.event_count.fetch_add(1, Ordering::Relaxed);
        Ok(envelope)
    }

    /// Subscribe to future events of one session.
    ///
    /// Events published before subscribing are not replayed. Subscribing to a
    /// session that already terminated yields an empty subscription.
    pub fn subscribe(&self, session_id: Uuid) -> Subscription {
        let channel = self.channel(session_id);
        let mut state = lock(&channel);

        let slot = if state.terminated {
            Arc::new(Slot::closed())
        } else {
            let slot = Arc::new(Slot::new());
            state.subscribers.push(slot.clone());
            slot
        };

        Subscription {
            session_id,
            slot,
            finished: false,
        }
    }

    /// Advance a session's sequence counter so the next event is numbered
    /// after `sequence`. Used when resuming a session from a checkpoint.
    pub fn resume_sequence(&self, session_id: Uuid, sequence: u64) {
        let channel = self.channel(session_id);
        let mut state = lock(&channel);
        if sequence > state.last_sequence {
            state.last_sequence = sequence;
        }
    }

    /// Sequence number of the most recent event of a session (0 if none).
    pub fn last_sequence(&self, session_id: Uuid) -> u64 {
        self.existing(session_id)
            .map_or(0, |channel| lock(&channel).last_sequence)
    }

    pub fn is_terminated(&self, session_id: Uuid) -> bool {
        self.existing(session_id)
            .is_some_and(|channel| lock(&channel).terminated)
    }

    /// Get the number of live subscribers of a session
    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        let Some(channel) = self.existing(session_id) else {
            return 0;
        };
        let state = lock(&channel);
        state
            .subscribers
            .iter()
            .filter(|slot| {
                let slot = lock(&slot.state);
                !slot.receiver_dropped && !slot.disconnected
            })
            .count()
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> usize {
        self.inner.event_count.load(Ordering::Relaxed)
    }

    /// Number of sessions the bus currently keeps state for.
    pub fn session_count(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    /// Drop all bookkeeping for a session.
    ///
    /// Subscriptions already handed out keep the events queued for them.
    pub fn forget(&self, session_id: Uuid) {
        if lock(&self.inner.sessions).remove(&session_id).is_some() {
            debug!(session_id = %session_id, "Session channel removed");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.inner.policy)
            .field("event_count", &self.event_count())
            .finish()
    }
}

/// Event bus handle scoped to a single session.
#[derive(Clone, Debug)]
pub struct SessionPublisher {
    bus: EventBus,
    session_id: Uuid,
}

impl SessionPublisher {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn publish(&self, actor: Actor, event: Event) -> Result<EventEnvelope> {
        let result = self.bus.publish(self.session_id, actor, event);
        if let Err(ref e) = result {
            warn!(session_id = %self.session_id, error = %e, "Event rejected");
        }
        result
    }

    /// Sequence number the next published event will carry.
    pub fn next_sequence(&self) -> u64 {
        self.bus.last_sequence(self.session_id) + 1
    }

    pub fn resume_after(&self, sequence: u64) {
        self.bus.resume_sequence(self.session_id, sequence);
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe(self.session_id)
    }

    pub fn is_terminated(&self) -> bool {
        self.bus.is_terminated(self.session_id)
    }
}

/// Ordered, finite stream of one session's events.
///
/// Ends after the terminal event is delivered, or when the subscriber was
/// disconnected for falling behind.
pub struct Subscription {
    session_id: Uuid,
    slot: Arc<Slot>,
    finished: bool,
}

impl Subscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the next event; `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            if let Some(next) = self.try_next() {
                return next;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv): `None` when nothing is queued yet.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.try_next().flatten()
    }

    fn try_next(&mut self) -> Option<Option<EventEnvelope>> {
        if self.finished {
            return Some(None);
        }

        let mut state = lock(&self.slot.state);
        if let Some(envelope) = state.queue.pop_front() {
            if envelope.event.is_terminal() {
                self.finished = true;
            }
            return Some(Some(envelope));
        }
        if state.disconnected {
            self.finished = true;
            return Some(None);
        }
        None
    }

    /// Number of events discarded for this subscriber under drop-oldest.
    pub fn dropped(&self) -> u64 {
        lock(&self.slot.state).dropped
    }

    pub fn is_disconnected(&self) -> bool {
        lock(&self.slot.state).disconnected
    }

    pub fn into_stream(self) -> impl Stream<Item = EventEnvelope> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|envelope| (envelope, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock(&self.slot.state).receiver_dropped = true;
    }
}
