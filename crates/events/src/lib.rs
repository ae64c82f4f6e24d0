//! Event system for taskfleet
//!
//! This crate provides the per-session event bus and the event types that
//! make orchestration progress observable.

mod bus;
mod error;
mod types;

pub use bus::{EventBus, OverflowPolicy, SessionPublisher, Subscription};
pub use error::{EventError, Result};
pub use types::*;
