//! Domain model for the taskfleet orchestration core.
//!
//! Everything a session persists or reasons about lives here: the immutable
//! [`Task`], the [`Ledger`] with its plan and progress counters, approval
//! requests and the [`Checkpoint`] snapshot written at round boundaries.

pub mod domain;
mod error;
mod state_machine;

pub use domain::*;
pub use error::{CoreError, Result};
pub use state_machine::{ApprovalStateMachine, StepStateMachine};
