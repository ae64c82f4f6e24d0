//! Typed orchestrator configuration.
//!
//! Configuration is parsed from TOML into [`OrchestratorConfig`] and validated
//! before any session starts. Unknown keys are rejected.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use events::OverflowPolicy;
use fleet_core::Capability;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// What an approval wait does when its deadline elapses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Treat the request as denied.
    #[default]
    Deny,
    /// Announce the escalation and keep waiting without a deadline.
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ApprovalConfig {
    pub timeout_secs: u64,
    pub on_timeout: TimeoutPolicy,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            on_timeout: TimeoutPolicy::Deny,
        }
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Consecutive failed writes tolerated before the session fails.
    pub max_write_failures: u32,
    /// Condensed history entries kept in each checkpoint.
    pub history_limit: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_write_failures: 3,
            history_limit: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Global bound on concurrent model invocations across all sessions.
    pub max_concurrent_calls: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
        }
    }
}

/// Per-capability executor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Tool handles bound to the executor.
    pub tools: Vec<String>,
    /// Retries after the first attempt for transient errors.
    pub max_retries: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Consecutive rounds without new progress before a replan.
    pub stall_threshold: u32,
    /// Replans allowed before the session fails.
    pub max_replans: u32,
    /// Hard ceiling on committed rounds per session.
    pub max_rounds: u64,
    pub round_deadline_secs: u64,
    pub retry_backoff_ms: u64,
    /// Most recent facts handed to an executor.
    pub max_context_facts: usize,
    pub approval: ApprovalConfig,
    pub checkpoint: CheckpointConfig,
    pub events: EventsConfig,
    pub admission: AdmissionConfig,
    pub executors: BTreeMap<Capability, ExecutorSettings>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stall_threshold: 3,
            max_replans: 3,
            max_rounds: 50,
            round_deadline_secs: 300,
            retry_backoff_ms: 500,
            max_context_facts: 64,
            approval: ApprovalConfig::default(),
            checkpoint: CheckpointConfig::default(),
            events: EventsConfig::default(),
            admission: AdmissionConfig::default(),
            executors: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Config loaded successfully");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive: [(&str, u64); 7] = [
            ("stall_threshold", u64::from(self.stall_threshold)),
            ("max_rounds", self.max_rounds),
            ("round_deadline_secs", self.round_deadline_secs),
            ("max_context_facts", self.max_context_facts as u64),
            ("checkpoint.max_write_failures", u64::from(self.checkpoint.max_write_failures)),
            ("events.queue_capacity", self.events.queue_capacity as u64),
            ("admission.max_concurrent_calls", self.admission.max_concurrent_calls as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(OrchestratorError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.approval.timeout_secs == 0 && self.approval.on_timeout == TimeoutPolicy::Deny {
            return Err(OrchestratorError::Config(
                "approval.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn round_deadline(&self) -> Duration {
        Duration::from_secs(self.round_deadline_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn executor_settings(&self, capability: Capability) -> ExecutorSettings {
        self.executors
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }
}
