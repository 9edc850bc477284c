use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::board::{AgentId, Board, TaskId};
use crate::config::{AgentBoardConfig, LoopSettings};
use crate::gateway::ToolGateway;
use crate::memory::{FileMemoryStore, MemoryStore};
use crate::providers::{build_provider, ProviderRegistry};
use crate::tools::ToolRegistry;
use crate::workspace::WorkspaceManager;

/// Root service object shared by every agent loop.
pub struct AppContext {
    pub board: Arc<Board>,
    pub tools: Arc<ToolRegistry>,
    pub gateway: Arc<ToolGateway>,
    pub providers: Arc<ProviderRegistry>,
    pub memory: Arc<dyn MemoryStore>,
    pub workspaces: WorkspaceManager,
    pub settings: LoopSettings,
}

impl AppContext {
    /// Fresh board and an empty gateway around the given collaborators.
    pub fn new(
        providers: ProviderRegistry,
        memory: Arc<dyn MemoryStore>,
        workspaces: WorkspaceManager,
        settings: LoopSettings,
    ) -> Self {
        let gateway = Arc::new(ToolGateway::new(settings.discovery_timeout()));
        Self {
            board: Arc::new(Board::new()),
            tools: Arc::new(ToolRegistry::new().with_gateway(gateway.clone())),
            gateway,
            providers: Arc::new(providers),
            memory,
            workspaces,
            settings,
        }
    }

    /// Builds every service from configuration and connects tool servers.
    pub async fn from_config(config: &AgentBoardConfig) -> Result<Self> {
        let mut providers = ProviderRegistry::new();
        for (name, settings) in &config.providers {
            match build_provider(name, settings.kind, settings.config.clone()) {
                Ok(provider) => providers.register(provider),
                Err(e) => warn!("Provider '{}' unavailable: {:#}", name, e),
            }
        }
        providers.set_fallback(config.fallback_provider.clone());
        info!("Providers: {}", providers.list_providers().join(", "));

        let memory = Arc::new(FileMemoryStore::new(config.memory_dir())?);
        let workspaces = WorkspaceManager::new(config.workspaces_dir())?;
        let context = Self::new(providers, memory, workspaces, config.loop_settings.clone());

        let servers = context.gateway.load_config(&config.tool_servers_path()).await;
        info!(
            "Connected {} tool servers ({} external tools)",
            servers,
            context.gateway.tools().len()
        );
        Ok(context)
    }

    /// Spawns the configured agents and creates the configured tasks, resolving
    /// `parent` and `depends_on` by title. Returns the new agent ids.
    pub fn seed(&self, config: &AgentBoardConfig) -> Vec<AgentId> {
        let agent_ids = config
            .agents
            .iter()
            .map(|spec| self.board.spawn_agent(&spec.name, spec.agent_config()).id)
            .collect();

        let mut by_title: HashMap<&str, TaskId> = HashMap::new();
        for spec in &config.tasks {
            let parent = spec.parent.as_deref().and_then(|title| {
                let found = by_title.get(title).map(String::as_str);
                if found.is_none() {
                    warn!("Parent '{}' of task '{}' is not defined earlier", title, spec.title);
                }
                found
            });
            let task = self.board.create_task(&spec.title, spec.priority, parent);
            by_title.insert(&spec.title, task.id);
        }

        for spec in &config.tasks {
            let Some(task_id) = by_title.get(spec.title.as_str()) else {
                continue;
            };
            for dependency in &spec.depends_on {
                match by_title.get(dependency.as_str()) {
                    Some(dependency_id) => {
                        self.board.add_dependency(task_id, dependency_id);
                    }
                    None => warn!("Task '{}' depends on unknown task '{}'", spec.title, dependency),
                }
            }
        }

        agent_ids
    }
}
