use serde::{Deserialize, Serialize};

pub type TaskId = String;
pub type AgentId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    AwaitingInput,
    Done,
    Archived,
}

impl TaskStatus {
    /// An agent owns the task while it is in one of these states.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::AwaitingInput)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Ordering weight used by auto-assignment (higher is picked first).
    pub fn weight(self) -> u8 {
        match self {
            TaskPriority::High => 3,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Link,
    Image,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub title: String,
    pub kind: ArtifactKind,
    pub locator: String,
}

impl Artifact {
    pub fn new(title: impl Into<String>, kind: ArtifactKind, locator: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            kind,
            locator: locator.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Tasks that must be DONE before this one can be assigned.
    pub dependencies: Vec<TaskId>,
    pub parent_id: Option<TaskId>,
    pub subtasks: Vec<TaskId>,
    pub assigned_agent_id: Option<AgentId>,
    pub status_message: Option<String>,
    pub progress: Option<String>,
    pub result: Option<String>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Idle,
    Working,
    Paused,
    Error,
}

/// Which LLM provider and model drive an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl AgentConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub config: AgentConfig,
    pub current_task_id: Option<TaskId>,
    pub current_activity: Option<String>,
    /// User message waiting to be consumed by the agent's next cycle.
    pub pending_input: Option<String>,
}
