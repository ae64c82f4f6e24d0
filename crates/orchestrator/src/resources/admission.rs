//! Global admission budget for model invocations.
//!
//! Every planner call and executor attempt holds a permit while it runs. The
//! permit is released when it is dropped, including when the awaiting future
//! is cancelled.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct AdmissionBudget {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionBudget {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| OrchestratorError::ResourceAcquisitionFailed(e.to_string()))?;
        trace!(available = self.available(), "Admission permit acquired");
        Ok(permit)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently held by running invocations.
    pub fn in_use(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let budget = AdmissionBudget::new(2);
        let first = budget.acquire().await.unwrap();
        let _second = budget.acquire().await.unwrap();
        assert_eq!(budget.in_use(), 2);

        let waiting = tokio::time::timeout(Duration::from_millis(20), budget.acquire()).await;
        assert!(waiting.is_err());

        drop(first);
        assert_eq!(budget.available(), 1);
        assert!(budget.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_holds_nothing() {
        let budget = AdmissionBudget::new(1);
        let held = budget.acquire().await.unwrap();

        let waiter = {
            let budget = budget.clone();
            tokio::spawn(async move { budget.acquire().await.map(drop) })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(budget.available(), 1);
    }

    #[test]
    fn test_zero_limit_clamped() {
        assert_eq!(AdmissionBudget::new(0).limit(), 1);
    }
}
