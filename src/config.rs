use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::{AgentConfig, TaskPriority};
use crate::providers::{ProviderConfig, ProviderKind};

pub const CONFIG_ENV_VAR: &str = "AGENTBOARD_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBoardConfig {
    /// Root for agent workspaces and memory files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Tool server definitions; defaults to `<data_dir>/mcp.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_servers_file: Option<PathBuf>,
    /// Provider used when an agent names one that is not registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSpec>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".agent")
}

/// Pacing and retry knobs for every agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub idle_poll_ms: u64,
    pub cycle_pause_ms: u64,
    pub paused_poll_ms: u64,
    /// Consecutive unparseable replies before the agent is marked stuck.
    pub max_malformed_responses: u32,
    pub recent_log_days: u32,
    pub discovery_timeout_secs: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            idle_poll_ms: 5000,
            cycle_pause_ms: 2000,
            paused_poll_ms: 5000,
            max_malformed_responses: 5,
            recent_log_days: 1,
            discovery_timeout_secs: 30,
        }
    }
}

impl LoopSettings {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }

    pub fn paused_poll(&self) -> Duration {
        Duration::from_millis(self.paused_poll_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    #[serde(flatten)]
    pub config: ProviderConfig,
}

/// An agent spawned at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl AgentSpec {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

/// A task seeded at startup. `parent` and `depends_on` refer to other seeded
/// tasks by title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Default for AgentBoardConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();

        // Local Ollama through its OpenAI-compatible endpoint
        providers.insert(
            "ollama".to_string(),
            ProviderSettings {
                kind: ProviderKind::OpenaiCompatible,
                config: ProviderConfig {
                    base_url: Some("http://localhost:11434".to_string()),
                    ..Default::default()
                },
            },
        );

        Self {
            data_dir: default_data_dir(),
            tool_servers_file: None,
            fallback_provider: None,
            loop_settings: LoopSettings::default(),
            providers,
            agents: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

impl AgentBoardConfig {
    /// Loads from `$AGENTBOARD_CONFIG` or `~/.config/agentboard/config.toml`,
    /// writing the defaults there on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = Self::default();
            default_config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(default_config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".config").join("agentboard").join("config.toml"))
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir.join("memory")
    }

    pub fn tool_servers_path(&self) -> PathBuf {
        self.tool_servers_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mcp.json"))
    }
}
