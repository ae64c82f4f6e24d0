use async_trait::async_trait;
use fleet_core::{Ledger, PlanStep, Task};

use crate::error::PlanningError;

/// External planning capability.
///
/// Produces the initial plan for a task and regenerated plans once the loop
/// stalls. Returned plans are validated against the executor registry before
/// they are adopted.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, task: &Task) -> Result<Vec<PlanStep>, PlanningError>;

    /// Regenerate the plan from what the ledger has learned so far.
    async fn replan(&self, ledger: &Ledger) -> Result<Vec<PlanStep>, PlanningError>;
}
