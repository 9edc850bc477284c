use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::sandbox::resolve_in_workspace;
use super::{parse_args, ArgumentSchema, Tool, ToolContext, ToolError};

pub const READ_FILE_TOOL: &str = "read_file";
pub const WRITE_FILE_TOOL: &str = "write_file";
pub const RUN_COMMAND_TOOL: &str = "run_command";
pub const ASK_USER_TOOL: &str = "ask_user";

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
        Arc::new(RunCommandTool),
        Arc::new(AskUserTool),
    ]
}

// --- read_file ---

pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        READ_FILE_TOOL
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().field("path", "string", true, "Path relative to the workspace")
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: ReadFileArgs = parse_args(self.name(), args)?;
        let path = resolve_in_workspace(&ctx.workspace_root, &args.path)?;

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ToolError::Io {
                action: "reading",
                path: args.path,
                source,
            })
    }
}

// --- write_file ---

pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        WRITE_FILE_TOOL
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, creating parent directories as needed"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .field("path", "string", true, "Path relative to the workspace")
            .field("content", "string", true, "Full file contents")
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: WriteFileArgs = parse_args(self.name(), args)?;
        let path = resolve_in_workspace(&ctx.workspace_root, &args.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ToolError::Io {
                    action: "creating directories for",
                    path: args.path.clone(),
                    source,
                })?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|source| ToolError::Io {
                action: "writing",
                path: args.path.clone(),
                source,
            })?;

        Ok(format!(
            "Successfully wrote {} bytes to {}",
            args.content.len(),
            path.display()
        ))
    }
}

// --- run_command ---

pub struct RunCommandTool;

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, true) => "(no output)".to_string(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n[stderr]\n{}", stdout, stderr),
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        RUN_COMMAND_TOOL
    }

    fn description(&self) -> &str {
        "Run a shell command with the workspace as working directory"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().field("command", "string", true, "Shell command line")
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: RunCommandArgs = parse_args(self.name(), args)?;
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                reason: "command must not be empty".to_string(),
            });
        }

        let mut command = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&args.command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&args.command);
            cmd
        };
        command
            .current_dir(&ctx.workspace_root)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(agent_id = %ctx.agent_id, "Running command: {}", args.command);
        let output = command.output().await.map_err(|source| ToolError::Io {
            action: "running",
            path: args.command.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = combine_output(&stdout, &stderr);

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ToolError::CommandFailed {
                status: output.status.to_string(),
                output: combined,
            })
        }
    }
}

// --- ask_user ---

/// Listed so the model knows it can ask; the pause itself is handled by the
/// agent loop, which treats `ask_user` as a reserved action.
pub struct AskUserTool;

#[derive(Debug, Deserialize)]
struct AskUserArgs {
    #[serde(default)]
    question: Option<String>,
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        ASK_USER_TOOL
    }

    fn description(&self) -> &str {
        "Pause and ask the user for clarification or input"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().field("question", "string", true, "The question to ask the user")
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let args: AskUserArgs = parse_args(self.name(), args)?;
        Ok(format!("AWAITING_INPUT: {}", args.question.unwrap_or_default()))
    }
}
