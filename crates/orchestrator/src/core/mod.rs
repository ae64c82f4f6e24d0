//! Core of the orchestration loop.
//!
//! - [`Orchestrator`] - Per-session round loop over a ledger
//! - [`DispatchEngine`] - Executor invocation, retries and approval handshake
//! - [`EventEmitter`] - Session-scoped event publishing

mod dispatch;
mod events;
mod round;

pub use dispatch::{Dispatch, DispatchEngine};
pub use events::EventEmitter;
pub use round::{Orchestrator, OrchestratorDeps, RoundReport, SessionOutcome};
