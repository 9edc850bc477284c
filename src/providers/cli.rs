use super::*;
use anyhow::Context;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const MODEL_PLACEHOLDER: &str = "{model}";

/// Runs a local model CLI once per completion. The conversation is flattened
/// into `role: content` lines and passed where `{prompt}` appears in `args`,
/// or appended as the last argument.
pub struct CliProvider {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl CliProvider {
    pub fn new(name: &str, config: ProviderConfig) -> Result<Self> {
        let command = config
            .command
            .ok_or_else(|| ProviderError::InvalidConfig(format!("provider '{}' has no command", name)))?;
        let program = which::which(&command)
            .with_context(|| format!("Command '{}' for provider '{}' not found", command, name))?;

        Ok(Self {
            name: name.to_string(),
            program,
            args: config.args,
        })
    }

    pub fn flatten(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_args(&self, prompt: &str, model: &str) -> Vec<String> {
        let mut placed = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(PROMPT_PLACEHOLDER) {
                    placed = true;
                }
                arg.replace(PROMPT_PLACEHOLDER, prompt)
                    .replace(MODEL_PLACEHOLDER, model)
            })
            .collect();
        if !placed {
            args.push(prompt.to_string());
        }
        args
    }
}

#[async_trait]
impl LlmProvider for CliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, messages: &[Message], config: &GenerationConfig) -> Result<String> {
        let prompt = Self::flatten(messages);
        let mut cmd = Command::new(&self.program);
        cmd.args(self.build_args(&prompt, &config.model))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(provider = %self.name, "Running {}", self.program.display());
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        if !output.status.success() {
            return Err(ProviderError::Cli {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse(self.name.clone()).into());
        }
        Ok(text)
    }
}
