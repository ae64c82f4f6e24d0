//! RAII resource guards for automatic cleanup.
//!
//! - [`AdmissionBudget`] - Bounded concurrent model invocations
//! - [`SessionGuard`] - Automatic session failure handling

mod admission;
mod session_guard;

pub use admission::AdmissionBudget;
pub use session_guard::SessionGuard;
