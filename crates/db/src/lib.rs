//! Checkpoint persistence for taskfleet sessions.
//!
//! [`CheckpointStore`] is the contract the orchestrator depends on. Two
//! implementations ship here: an in-process [`MemoryCheckpointStore`] and the
//! SQLite-backed [`SqliteCheckpointStore`].

mod error;
pub mod models;
mod pool;
pub mod repositories;
mod store;

pub use error::*;
pub use models::{CheckpointRow, CheckpointSummary};
pub use pool::*;
pub use repositories::*;
pub use store::*;
