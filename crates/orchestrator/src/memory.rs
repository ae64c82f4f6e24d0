//! Per-session context memory.
//!
//! Facts learned in committed rounds are offered to the memory so that later
//! executors see them even after the ledger's own fact list was condensed.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait ContextMemory: Send + Sync {
    /// Facts remembered for a session, oldest first.
    async fn fetch_facts(&self, session_id: Uuid) -> Result<Vec<String>>;

    async fn store_facts(&self, session_id: Uuid, facts: &[String]) -> Result<()>;
}

/// Process-local memory. Repeated facts are stored once.
#[derive(Debug, Default)]
pub struct InMemoryContextMemory {
    sessions: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl InMemoryContextMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
    }
}

#[async_trait]
impl ContextMemory for InMemoryContextMemory {
    async fn fetch_facts(&self, session_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn store_facts(&self, session_id: Uuid, facts: &[String]) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.entry(session_id).or_default();
        for fact in facts {
            if !stored.contains(fact) {
                stored.push(fact.clone());
            }
        }
        Ok(())
    }
}
