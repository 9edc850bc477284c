//! Tool surface exposed to agents: built-in sandboxed tools plus whatever the
//! external gateway discovered, merged behind one lookup.

pub mod builtin;
pub mod sandbox;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::gateway::ToolGateway;

pub use builtin::{builtin_tools, ASK_USER_TOOL, READ_FILE_TOOL, RUN_COMMAND_TOOL, WRITE_FILE_TOOL};

/// Failures a tool can report. These never reach the agent loop as errors:
/// [`ToolRegistry::invoke`] renders them as text for the model to read.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Security Error: Access denied ({path} is outside the workspace)")]
    AccessDenied { path: String },

    #[error("Error {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error executing command ({status}): {output}")]
    CommandFailed { status: String, output: String },

    #[error("Error: {message}")]
    External { server: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// Where and on whose behalf a tool runs.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
    pub agent_id: String,
}

/// Outcome of an invocation. Success and failure are both plain text.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Structural description of a tool's arguments, used only to document the
/// tool for the model.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ArgumentSchema {
    pub fields: Vec<FieldSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: &str, kind: &str, required: bool, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind: kind.to_string(),
            required,
            description: (!description.is_empty()).then(|| description.to_string()),
        });
        self
    }

    /// Reads the `properties`/`required` parts of a JSON Schema object.
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| {
                        let kind = match property.get("type") {
                            Some(Value::String(kind)) => kind.clone(),
                            Some(Value::Array(kinds)) => kinds
                                .iter()
                                .filter_map(Value::as_str)
                                .collect::<Vec<_>>()
                                .join("|"),
                            _ => "any".to_string(),
                        };
                        FieldSpec {
                            name: name.clone(),
                            kind,
                            required: required.contains(&name.as_str()),
                            description: property
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { fields }
    }

    /// One-line rendering, e.g. `path: string (required), content: string`.
    pub fn summary(&self) -> String {
        self.fields
            .iter()
            .map(|field| {
                if field.required {
                    format!("{}: {} (required)", field.name, field.kind)
                } else {
                    format!("{}: {}", field.name, field.kind)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> ArgumentSchema;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Deserialises a tool's typed parameters, treating a missing payload as `{}`.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Merged tool namespace. Built-ins win over gateway tools on lookup; gateway
/// names carry a `<server>__` prefix so they cannot collide anyway.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    gateway: Option<Arc<ToolGateway>>,
}

impl ToolRegistry {
    /// Registry holding the built-in tools only.
    pub fn new() -> Self {
        Self {
            tools: builtin_tools(),
            gateway: None,
        }
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<ToolGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Adds a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|existing| existing.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .cloned()
            .or_else(|| self.gateway.as_ref().and_then(|gateway| gateway.get(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Built-ins first, then gateway tools sorted by name.
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools = self.tools.clone();
        if let Some(gateway) = &self.gateway {
            tools.extend(gateway.tools());
        }
        tools
    }

    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let outcome = match self.get(name) {
            Some(tool) => tool.execute(args, ctx).await,
            None => Err(ToolError::UnknownTool(name.to_string())),
        };

        match outcome {
            Ok(content) => ToolResult {
                tool_name: name.to_string(),
                content,
                is_error: false,
            },
            Err(e) => {
                match &e {
                    ToolError::InvalidArguments { .. } => {
                        tracing::warn!(agent_id = %ctx.agent_id, "Rejected call to {}: {}", name, e)
                    }
                    _ => tracing::debug!(agent_id = %ctx.agent_id, "Tool {} failed: {}", name, e),
                }
                ToolResult {
                    tool_name: name.to_string(),
                    content: e.to_string(),
                    is_error: true,
                }
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
