use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The category of action an executor can perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Research,
    CodeExecution,
    Analysis,
    FileAccess,
    WebBrowsing,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Self::Research,
        Self::CodeExecution,
        Self::Analysis,
        Self::FileAccess,
        Self::WebBrowsing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::CodeExecution => "code-execution",
            Self::Analysis => "analysis",
            Self::FileAccess => "file-access",
            Self::WebBrowsing => "web-browsing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "research" => Some(Self::Research),
            "code-execution" => Some(Self::CodeExecution),
            "analysis" => Some(Self::Analysis),
            "file-access" => Some(Self::FileAccess),
            "web-browsing" => Some(Self::WebBrowsing),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level goal of a session. Never mutated after the session starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub session_id: Uuid,
    pub goal: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            goal: goal.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(Capability::parse(capability.as_str()), Some(capability));
        }
        assert_eq!(Capability::parse("painting"), None);
    }

    #[test]
    fn test_capability_serialization() {
        let json = serde_json::to_string(&Capability::CodeExecution).unwrap();
        assert_eq!(json, "\"code-execution\"");
    }

    #[test]
    fn test_task_creation() {
        let session_id = Uuid::new_v4();
        let task = Task::new("summarize a document").with_session_id(session_id);

        assert_eq!(task.session_id, session_id);
        assert_eq!(task.goal, "summarize a document");
    }
}
