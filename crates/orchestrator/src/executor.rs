//! Executor dispatch contract and registry.
//!
//! An executor is an opaque capability provider. The orchestrator hands it a
//! bounded context and receives exactly one of three results: success with new
//! facts, an error classified as retryable or not, or a request for approval
//! of a side-effecting action.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::{ActionDescriptor, Capability, PlanStep};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, PlanningError, Result};

/// Bounded context handed to an executor for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorRequest {
    pub session_id: Uuid,
    pub step_index: usize,
    pub capability: Capability,
    pub description: String,
    /// Current facts, oldest first.
    pub facts: Vec<String>,
    pub tools: Vec<String>,
    /// Set when re-invoking after the approval gate approved this action.
    pub approved_action: Option<ActionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutorResult {
    Success {
        facts: Vec<String>,
        /// The executor reports that the task goal is reached.
        #[serde(default)]
        done: bool,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Error {
        message: String,
        retryable: bool,
    },
    NeedsApproval {
        action: ActionDescriptor,
    },
}

impl ExecutorResult {
    pub fn success<I, S>(facts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Success {
            facts: facts.into_iter().map(Into::into).collect(),
            done: false,
            payload: serde_json::Value::Null,
        }
    }

    /// Success that also signals the goal is reached.
    pub fn done<I, S>(facts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Self::success(facts) {
            Self::Success { facts, payload, .. } => Self::Success {
                facts,
                done: true,
                payload,
            },
            other => other,
        }
    }

    /// Attach a structured result to a success; other results are unchanged.
    pub fn with_payload(self, payload: serde_json::Value) -> Self {
        match self {
            Self::Success { facts, done, .. } => Self::Success {
                facts,
                done,
                payload,
            },
            other => other,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn needs_approval(action: ActionDescriptor) -> Self {
        Self::NeedsApproval { action }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn invoke(&self, request: ExecutorRequest) -> ExecutorResult;
}

/// Static description of a registered executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorDescriptor {
    pub capability: Capability,
    pub tools: Vec<String>,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl ExecutorDescriptor {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            tools: Vec::new(),
            max_retries: 3,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Clone)]
pub struct RegisteredExecutor {
    pub descriptor: ExecutorDescriptor,
    pub executor: Arc<dyn Executor>,
}

impl fmt::Debug for RegisteredExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredExecutor")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Capability to executor mapping, validated once at construction.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Capability, RegisteredExecutor>,
}

impl ExecutorRegistry {
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder::default()
    }

    pub fn resolve(&self, capability: Capability) -> Option<&RegisteredExecutor> {
        self.executors.get(&capability)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.executors.contains_key(&capability)
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities: Vec<_> = self.executors.keys().copied().collect();
        capabilities.sort();
        capabilities
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Reject plans that are empty or name a capability with no executor.
    pub fn validate_plan(&self, plan: &[PlanStep]) -> std::result::Result<(), PlanningError> {
        if plan.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }
        for (index, step) in plan.iter().enumerate() {
            if !self.contains(step.capability) {
                return Err(PlanningError::UnknownCapability {
                    index,
                    capability: step.capability,
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ExecutorRegistryBuilder {
    executors: HashMap<Capability, RegisteredExecutor>,
    duplicate: Option<Capability>,
}

impl ExecutorRegistryBuilder {
    pub fn register(mut self, descriptor: ExecutorDescriptor, executor: Arc<dyn Executor>) -> Self {
        let capability = descriptor.capability;
        if self.executors.contains_key(&capability) {
            self.duplicate.get_or_insert(capability);
            return self;
        }
        self.executors.insert(
            capability,
            RegisteredExecutor {
                descriptor,
                executor,
            },
        );
        self
    }

    /// Register an executor with tools and retry budget taken from configuration.
    pub fn register_configured(
        self,
        config: &OrchestratorConfig,
        capability: Capability,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let settings = config.executor_settings(capability);
        let descriptor = ExecutorDescriptor::new(capability)
            .with_tools(settings.tools)
            .with_max_retries(settings.max_retries);
        self.register(descriptor, executor)
    }

    pub fn build(self) -> Result<ExecutorRegistry> {
        if let Some(capability) = self.duplicate {
            return Err(OrchestratorError::DuplicateExecutor(capability));
        }
        debug!(executors = self.executors.len(), "Executor registry built");
        Ok(ExecutorRegistry {
            executors: self.executors,
        })
    }
}
