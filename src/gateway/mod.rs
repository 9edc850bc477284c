//! External Tool Gateway: launches out-of-process tool servers, discovers
//! their tools and exposes them as `<server>__<tool>` in the tool namespace.

pub mod server;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::tools::{ArgumentSchema, Tool, ToolContext, ToolError};

pub use server::{CallToolResult, RemoteTool, ServerLaunchSpec, ToolServer};

pub const NAMESPACE_SEPARATOR: &str = "__";

/// On-disk gateway configuration: `{"mcpServers": {"<name>": {...}}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ToolServersFile {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerLaunchSpec>,
}

pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, NAMESPACE_SEPARATOR, tool)
}

/// A discovered tool, proxied to the server that owns it.
pub struct ExternalTool {
    qualified_name: String,
    remote_name: String,
    description: String,
    schema: ArgumentSchema,
    server: Arc<ToolServer>,
}

#[async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ArgumentSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        let result = self
            .server
            .call_tool(&self.remote_name, args)
            .await
            .map_err(|e| ToolError::External {
                server: self.server.name().to_string(),
                message: format!("{:#}", e),
            })?;

        if result.is_error {
            Err(ToolError::External {
                server: self.server.name().to_string(),
                message: result.to_text(),
            })
        } else {
            Ok(result.to_text())
        }
    }
}

pub struct ToolGateway {
    servers: RwLock<HashMap<String, Arc<ToolServer>>>,
    tools: RwLock<BTreeMap<String, Arc<ExternalTool>>>,
    discovery_timeout: Duration,
}

impl ToolGateway {
    pub fn new(discovery_timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            tools: RwLock::new(BTreeMap::new()),
            discovery_timeout,
        }
    }

    /// Connects every server named in the file. A missing file means no
    /// external tools; a malformed file or a failing server is logged and
    /// skipped. Returns how many servers connected.
    pub async fn load_config(&self, path: &Path) -> usize {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No tool server config at {}", path.display());
                return 0;
            }
            Err(e) => {
                warn!("Failed to read tool server config {}: {}", path.display(), e);
                return 0;
            }
        };

        let config: ToolServersFile = match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Malformed tool server config {}: {}", path.display(), e);
                return 0;
            }
        };

        let attempts = config
            .servers
            .iter()
            .map(|(name, spec)| async move { (name, self.connect(name, spec).await) });

        let mut connected = 0;
        for (name, outcome) in futures::future::join_all(attempts).await {
            match outcome {
                Ok(count) => {
                    info!("Tool server '{}' connected with {} tools", name, count);
                    connected += 1;
                }
                Err(e) => warn!("Tool server '{}' unavailable: {:#}", name, e),
            }
        }
        connected
    }

    /// Launches a server, performs the handshake and registers its tools.
    /// Returns the number of tools discovered.
    pub async fn connect(&self, name: &str, spec: &ServerLaunchSpec) -> Result<usize> {
        if name.is_empty() || name.contains(NAMESPACE_SEPARATOR) {
            return Err(anyhow!("Invalid tool server name '{}'", name));
        }

        let discovery = async {
            let server = ToolServer::spawn(name, spec).await?;
            server.initialize().await?;
            let tools = server.list_tools().await?;
            Ok::<_, anyhow::Error>((server, tools))
        };
        let (server, remote_tools) = tokio::time::timeout(self.discovery_timeout, discovery)
            .await
            .map_err(|_| anyhow!("Timed out after {:?} during discovery", self.discovery_timeout))??;

        let server = Arc::new(server);
        let count = remote_tools.len();
        let previous = self.servers.write().insert(name.to_string(), server.clone());
        {
            let mut tools = self.tools.write();
            let prefix = qualified_name(name, "");
            tools.retain(|tool_name, _| !tool_name.starts_with(&prefix));

            for remote in remote_tools {
                let qualified = qualified_name(name, &remote.name);
                debug!("Discovered tool {}", qualified);
                tools.insert(
                    qualified.clone(),
                    Arc::new(ExternalTool {
                        qualified_name: qualified,
                        description: remote.description.unwrap_or_default(),
                        schema: ArgumentSchema::from_json_schema(&remote.input_schema),
                        remote_name: remote.name,
                        server: server.clone(),
                    }),
                );
            }
        }

        if let Some(previous) = previous {
            if let Err(e) = previous.shutdown().await {
                debug!("Replaced tool server '{}' did not shut down cleanly: {}", name, e);
            }
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .get(name)
            .map(|tool| tool.clone() as Arc<dyn Tool>)
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .read()
            .values()
            .map(|tool| tool.clone() as Arc<dyn Tool>)
            .collect()
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn disconnect(&self, name: &str) -> bool {
        let server = self.servers.write().remove(name);
        let Some(server) = server else {
            return false;
        };

        let prefix = qualified_name(name, "");
        self.tools
            .write()
            .retain(|tool_name, _| !tool_name.starts_with(&prefix));
        if let Err(e) = server.shutdown().await {
            debug!("Tool server '{}' did not shut down cleanly: {}", name, e);
        }
        info!("Disconnected tool server '{}'", name);
        true
    }

    pub async fn disconnect_all(&self) {
        for name in self.server_names() {
            self.disconnect(&name).await;
        }
    }
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
