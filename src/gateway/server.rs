use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How to launch one external tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerLaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
}

/// Any line the server sends. Responses carry `id` plus `result` or `error`;
/// notifications and server-initiated requests carry `method`.
#[derive(Debug, Deserialize)]
struct JsonRpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A capability advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Joins text blocks; falls back to the raw JSON if anything else is present.
    pub fn to_text(&self) -> String {
        let texts: Option<Vec<String>> = self
            .content
            .iter()
            .map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => block.get("text").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect();

        match texts {
            Some(texts) => texts.join("\n"),
            None => Value::Array(self.content.clone()).to_string(),
        }
    }
}

struct ServerIo {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// One running tool server process. Requests are serialised: the I/O lock is
/// held from writing a request until its response line has been read.
pub struct ToolServer {
    name: String,
    io: Mutex<ServerIo>,
    next_id: AtomicU64,
}

impl ToolServer {
    pub async fn spawn(name: &str, spec: &ServerLaunchSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch tool server '{}' ({})", name, spec.command))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("No stdin on tool server '{}'", name))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("No stdout on tool server '{}'", name))?;

        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{}", line);
                }
            });
        }

        Ok(Self {
            name: name.to_string(),
            io: Mutex::new(ServerIo {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol handshake: `initialize` followed by the `initialized` notification.
    pub async fn initialize(&self) -> Result<Value> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let response = self.request("initialize", params).await?;
        self.notify("notifications/initialized", serde_json::json!({})).await?;
        Ok(response)
    }

    async fn write_line(io: &mut ServerIo, line: String) -> Result<()> {
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.write_all(b"\n").await?;
        io.stdin.flush().await?;
        Ok(())
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;

        let mut io = self.io.lock().await;
        Self::write_line(&mut io, line)
            .await
            .with_context(|| format!("Failed to send '{}' to tool server '{}'", method, self.name))?;

        loop {
            let line = io
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| anyhow!("Tool server '{}' closed its output", self.name))?;
            if line.trim().is_empty() {
                continue;
            }

            let message: JsonRpcMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!(server = %self.name, "Ignoring non-protocol line: {}", line);
                    continue;
                }
            };

            if let Some(method) = &message.method {
                tracing::debug!(server = %self.name, "Ignoring server message: {}", method);
                continue;
            }
            if message.id.as_ref().and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = message.error {
                return Err(anyhow!("{} error {}: {}", method, error.code, error.message));
            }
            return Ok(message.result.unwrap_or(Value::Null));
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let line = serde_json::to_string(&JsonRpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        })?;
        let mut io = self.io.lock().await;
        Self::write_line(&mut io, line).await
    }

    /// Capability discovery, following `nextCursor` pages.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => serde_json::json!({ "cursor": cursor }),
                None => serde_json::json!({}),
            };
            let response = self.request("tools/list", params).await?;
            let page = response
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("Invalid tools/list response from '{}'", self.name))?;

            for entry in page {
                match serde_json::from_value::<RemoteTool>(entry.clone()) {
                    Ok(tool) => tools.push(tool),
                    Err(e) => tracing::warn!(server = %self.name, "Skipping malformed tool entry: {}", e),
                }
            }

            cursor = response
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let response = self.request("tools/call", params).await?;
        serde_json::from_value(response)
            .with_context(|| format!("Failed to parse tools/call result from '{}'", self.name))
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        io.child.kill().await?;
        Ok(())
    }
}
