pub mod approval;
pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod memory;
pub mod planner;
pub mod resources;
pub mod session_manager;

pub use approval::{ApprovalGate, ApprovalTicket};
pub use config::{
    AdmissionConfig, ApprovalConfig, CheckpointConfig, EventsConfig, ExecutorSettings,
    OrchestratorConfig, TimeoutPolicy,
};
pub use self::core::{Orchestrator, OrchestratorDeps, RoundReport, SessionOutcome};
pub use error::{OrchestratorError, PlanningError, Result};
pub use executor::{
    Executor, ExecutorDescriptor, ExecutorRegistry, ExecutorRegistryBuilder, ExecutorRequest,
    ExecutorResult,
};
pub use memory::{ContextMemory, InMemoryContextMemory};
pub use planner::Planner;
pub use resources::AdmissionBudget;
pub use session_manager::{SessionHandle, SessionManager};
