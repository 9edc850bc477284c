//! Per-agent execution loop: observe the board, ask the model for a decision,
//! act on it, report back.

pub mod decision;
pub mod prompt;
pub mod supervisor;

use anyhow::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::board::{AgentId, AgentStatus, Artifact, ArtifactKind};
use crate::context::AppContext;
use crate::providers::GenerationConfig;
use crate::tools::sandbox::workspace_relative;
use crate::tools::{ToolContext, WRITE_FILE_TOOL};

pub use decision::{parse_decision, Decision, DecisionError, ParsedDecision};
pub use supervisor::LoopSupervisor;

const SNIPPET_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Bootstrap,
    IdleWait,
    Working,
    Paused,
    /// Agent is in ERROR; waits for an operator reset.
    Stuck,
    Stopped,
}

/// What one decision cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Task or agent record disappeared.
    Vanished,
    Malformed,
    Stuck,
    Completed,
    AwaitingInput,
    ToolInvoked { tool: String, is_error: bool },
    UnknownAction(String),
    Failed(String),
}

/// Control side of a running loop.
pub struct LoopHandle {
    agent_id: AgentId,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Requests a cooperative stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the loop and waits for the in-flight cycle to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.join.await {
            error!(agent_id = %self.agent_id, "Agent loop ended abnormally: {}", e);
        }
    }
}

/// Cuts `text` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_snippet(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub struct AgentLoop {
    ctx: Arc<AppContext>,
    agent_id: AgentId,
    workspace_root: PathBuf,
    state: LoopState,
    malformed_streak: u32,
}

impl AgentLoop {
    pub fn new(ctx: Arc<AppContext>, agent_id: impl Into<AgentId>) -> Self {
        let agent_id = agent_id.into();
        let workspace_root = ctx.workspaces.workspace_root(&agent_id);
        Self {
            ctx,
            agent_id,
            workspace_root,
            state: LoopState::Bootstrap,
            malformed_streak: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs the loop on its own task.
    pub fn spawn(ctx: Arc<AppContext>, agent_id: impl Into<AgentId>) -> LoopHandle {
        let agent_loop = Self::new(ctx, agent_id);
        let agent_id = agent_loop.agent_id.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(agent_loop.run(stop_rx));
        LoopHandle {
            agent_id,
            stop_tx,
            join,
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(agent_id = %self.agent_id, "{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let Some(agent) = self.ctx.board.get_agent(&self.agent_id) else {
            error!(agent_id = %self.agent_id, "Agent not found, loop not started");
            self.transition(LoopState::Stopped);
            return;
        };
        info!(agent_id = %self.agent_id, "Starting loop for agent: {}", agent.name);

        match self.ctx.workspaces.create_workspace(&self.agent_id).await {
            Ok(root) => {
                info!(agent_id = %self.agent_id, "Workspace created: {}", root.display());
                self.workspace_root = root;
            }
            Err(e) => {
                error!(agent_id = %self.agent_id, "Cannot create workspace: {:#}", e);
                self.transition(LoopState::Stopped);
                return;
            }
        }
        self.transition(LoopState::IdleWait);

        while !*stop.borrow() {
            let Some(agent) = self.ctx.board.get_agent(&self.agent_id) else {
                info!(agent_id = %self.agent_id, "Agent removed, stopping loop");
                break;
            };

            let pause = match agent.status {
                AgentStatus::Idle => self.idle_step().await,
                AgentStatus::Working => self.working_step(agent.current_task_id).await,
                AgentStatus::Paused => {
                    self.transition(LoopState::Paused);
                    self.ctx
                        .board
                        .update_agent_activity(&self.agent_id, "Waiting for user input...");
                    Some(self.ctx.settings.paused_poll())
                }
                AgentStatus::Error => {
                    self.transition(LoopState::Stuck);
                    Some(self.ctx.settings.paused_poll())
                }
            };

            if let Some(duration) = pause {
                let wake_on_change = matches!(self.state, LoopState::IdleWait);
                if self.wait(duration, wake_on_change, &mut stop).await {
                    break;
                }
            }
        }

        self.transition(LoopState::Stopped);
        info!(agent_id = %self.agent_id, "Agent loop stopped");
    }

    /// Sleeps for `duration`. An idle loop also wakes on any board change;
    /// working and paused loops keep their full pacing interval. Returns true
    /// when a stop was requested.
    async fn wait(&self, duration: Duration, wake_on_change: bool, stop: &mut watch::Receiver<bool>) -> bool {
        let changed = self.ctx.board.changed().notified();
        let sender_gone = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = changed, if wake_on_change => false,
            res = stop.changed() => res.is_err(),
        };
        sender_gone || *stop.borrow()
    }

    async fn idle_step(&mut self) -> Option<Duration> {
        self.transition(LoopState::IdleWait);
        let board = &self.ctx.board;
        board.update_agent_activity(&self.agent_id, "Waiting for new tasks...");

        match board.assign_next_task(&self.agent_id) {
            Some(task) => {
                info!(agent_id = %self.agent_id, "Picked up task: {}", task.title);
                self.malformed_streak = 0;
                self.log(&format!(
                    "### Task Initiative\n**Mission:** {}\nAgent is initializing the workspace.",
                    task.title
                ))
                .await;
                None
            }
            None => Some(self.ctx.settings.idle_poll()),
        }
    }

    async fn working_step(&mut self, task_id: Option<String>) -> Option<Duration> {
        self.transition(LoopState::Working);
        let Some(task_id) = task_id else {
            warn!(agent_id = %self.agent_id, "Agent WORKING without a task, resetting");
            self.ctx.board.reset_agent(&self.agent_id);
            return None;
        };

        let outcome = self.cycle(&task_id).await;
        debug!(agent_id = %self.agent_id, "Cycle outcome: {:?}", outcome);

        let still_working = matches!(
            self.ctx.board.get_agent(&self.agent_id),
            Some(agent) if agent.status == AgentStatus::Working
        );
        still_working.then(|| self.ctx.settings.cycle_pause())
    }

    /// One decision cycle. Errors and panics stop here.
    pub async fn cycle(&mut self, task_id: &str) -> CycleOutcome {
        let agent_id = self.agent_id.clone();
        match AssertUnwindSafe(self.run_cycle(task_id)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(agent_id = %agent_id, "Cycle failed: {:#}", e);
                CycleOutcome::Failed(format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(agent_id = %agent_id, "Cycle panicked: {}", message);
                CycleOutcome::Failed(message)
            }
        }
    }

    async fn run_cycle(&mut self, task_id: &str) -> Result<CycleOutcome> {
        let ctx = self.ctx.clone();
        let board = &ctx.board;
        let (Some(task), Some(agent)) = (board.get_task(task_id), board.get_agent(&self.agent_id)) else {
            return Ok(CycleOutcome::Vanished);
        };

        let logs = ctx.memory.recent_logs(ctx.settings.recent_log_days).await?;
        let knowledge = ctx.memory.read_knowledge().await?;
        let tools = ctx.tools.list();
        let messages = prompt::compose(&prompt::PromptContext {
            task_title: &task.title,
            knowledge: &knowledge,
            workspace_root: &self.workspace_root,
            latest_log: logs.first().map(String::as_str),
            tools: &tools,
            pending_input: agent.pending_input.as_deref(),
        });

        board.update_agent_activity(&self.agent_id, format!("Thinking about: {}", task.title));
        let raw = ctx
            .providers
            .generate(&messages, &agent.config.provider, &GenerationConfig::from(&agent.config))
            .await?;

        let parsed = match parse_decision(&raw, |name| ctx.tools.contains(name)) {
            Ok(parsed) => {
                self.malformed_streak = 0;
                parsed
            }
            Err(e) => return Ok(self.on_malformed(&e, &raw).await),
        };
        info!(agent_id = %self.agent_id, "Thought: {}", parsed.thought);

        match parsed.decision {
            Decision::Complete { result } => {
                board.update_agent_activity(&self.agent_id, "Finalizing task...");
                board.complete_task(task_id, &self.agent_id, result);
                info!(agent_id = %self.agent_id, "Task completed: {}", task.title);
                self.log(&format!(
                    "## Mission Accomplished\nTask **{}** has been successfully completed.",
                    task.title
                ))
                .await;
                board.update_agent_activity(&self.agent_id, "Mission complete.");
                Ok(CycleOutcome::Completed)
            }
            Decision::AskUser { question } => {
                board.update_agent_activity(&self.agent_id, "Paused for input.");
                board.request_input(task_id, &self.agent_id, question.clone());
                self.log(&format!("### Attention Required\n**Agent asks:** {}", question))
                    .await;
                Ok(CycleOutcome::AwaitingInput)
            }
            Decision::InvokeTool { name, args } => {
                board.update_agent_activity(&self.agent_id, format!("Executing tool: {}", name));
                let written_path = (name == WRITE_FILE_TOOL)
                    .then(|| args.get("path").and_then(|p| p.as_str()))
                    .flatten()
                    .and_then(|p| workspace_relative(&self.workspace_root, p));

                let tool_ctx = ToolContext {
                    workspace_root: self.workspace_root.clone(),
                    agent_id: self.agent_id.clone(),
                };
                let result = ctx.tools.invoke(&name, args, &tool_ctx).await;
                let snippet = truncate_snippet(&result.content, SNIPPET_LIMIT);
                debug!(agent_id = %self.agent_id, "Result of {}: {}", name, snippet);

                if let (false, Some(path)) = (result.is_error, written_path) {
                    board.add_artifact(task_id, Artifact::new(path.clone(), ArtifactKind::File, path));
                }
                let progress = if parsed.thought.is_empty() {
                    format!("Ran {}", name)
                } else {
                    parsed.thought.clone()
                };
                board.update_task_progress(task_id, progress);

                self.log(&format!(
                    "#### Tool Execution: {}\n**Thought:** {}\n\n**Result Snippet:**\n```\n{}\n```",
                    name, parsed.thought, snippet
                ))
                .await;
                board.update_agent_activity(&self.agent_id, format!("Finished {}. Pacing...", name));

                if let Some(input) = agent.pending_input.as_deref() {
                    board.consume_agent_input(&self.agent_id, input);
                }
                Ok(CycleOutcome::ToolInvoked {
                    tool: name,
                    is_error: result.is_error,
                })
            }
            Decision::Unknown { name } => {
                warn!(agent_id = %self.agent_id, "Unknown tool: {}", name);
                board.update_agent_activity(&self.agent_id, format!("Unknown action: {}", name));
                Ok(CycleOutcome::UnknownAction(name))
            }
        }
    }

    async fn on_malformed(&mut self, error: &DecisionError, raw: &str) -> CycleOutcome {
        self.malformed_streak += 1;
        warn!(
            agent_id = %self.agent_id,
            "Failed to parse LLM response ({} in a row): {}",
            self.malformed_streak,
            error
        );
        debug!(agent_id = %self.agent_id, "Raw response: {}", raw);

        let limit = self.ctx.settings.max_malformed_responses;
        if limit == 0 || self.malformed_streak < limit {
            return CycleOutcome::Malformed;
        }

        let reason = format!(
            "Stuck: {} unparseable responses in a row ({})",
            self.malformed_streak, error
        );
        self.ctx.board.mark_agent_stuck(&self.agent_id, reason.clone());
        self.log(&format!("### Agent Stuck\n{}", reason)).await;
        self.malformed_streak = 0;
        CycleOutcome::Stuck
    }

    async fn log(&self, content: &str) {
        if let Err(e) = self.ctx.memory.append_log(content, &self.agent_id).await {
            warn!(agent_id = %self.agent_id, "Failed to write memory log: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{AgentConfig, Board, TaskPriority, TaskStatus};
    use crate::config::LoopSettings;
    use crate::memory::InMemoryStore;
    use crate::providers::{LlmProvider, Message, MockProvider, ProviderRegistry};
    use async_trait::async_trait;
    use crate::workspace::WorkspaceManager;

    struct Harness {
        ctx: Arc<AppContext>,
        memory: Arc<InMemoryStore>,
        provider: Arc<MockProvider>,
        _dir: tempfile::TempDir,
    }

    fn fast_settings() -> LoopSettings {
        LoopSettings {
            idle_poll_ms: 10,
            cycle_pause_ms: 10,
            paused_poll_ms: 10,
            max_malformed_responses: 3,
            ..LoopSettings::default()
        }
    }

    fn harness(replies: &[&str]) -> Harness {
        harness_with(replies, fast_settings())
    }

    fn harness_with(replies: &[&str], settings: LoopSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::with_replies("scripted", replies.iter().copied()));
        let mut providers = ProviderRegistry::new();
        providers.register(provider.clone());
        let memory = Arc::new(InMemoryStore::new());
        let ctx = AppContext::new(
            providers,
            memory.clone(),
            WorkspaceManager::new(dir.path()).unwrap(),
            settings,
        );
        Harness {
            ctx: Arc::new(ctx),
            memory,
            provider,
            _dir: dir,
        }
    }

    /// Spawns an agent on the scripted provider and assigns it one task.
    fn working_agent(h: &Harness, title: &str) -> (AgentId, String) {
        let agent = h.ctx.board.spawn_agent("W", AgentConfig::new("scripted", "test-model"));
        let task = h.ctx.board.create_task(title, TaskPriority::High, None);
        assert!(h.ctx.board.assign_task(&task.id, &agent.id));
        (agent.id, task.id)
    }

    async fn bootstrapped(h: &Harness, agent_id: &str) -> AgentLoop {
        let mut agent_loop = AgentLoop::new(h.ctx.clone(), agent_id);
        agent_loop.workspace_root = h.ctx.workspaces.create_workspace(agent_id).await.unwrap();
        agent_loop
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_truncate_snippet() {
        assert_eq!(truncate_snippet("short", 200), "short");
        let long = "é".repeat(250);
        let cut = truncate_snippet(&long, 200);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn test_task_complete_cycle() {
        let h = harness(&[r#"{"thought":"done","action":"task_complete","args":{"result":"All good"}}"#]);
        let (agent_id, task_id) = working_agent(&h, "Write docs");
        h.ctx.board.provide_input(&agent_id, "hurry");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        assert_eq!(agent_loop.cycle(&task_id).await, CycleOutcome::Completed);

        let task = h.ctx.board.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result.as_deref(), Some("All good"));
        let agent = h.ctx.board.get_agent(&agent_id).unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert!(agent.pending_input.is_none());
        assert!(h.memory.all_logs().contains("Mission Accomplished"));
    }

    #[tokio::test]
    async fn test_ask_user_cycle() {
        let h = harness(&[r#"{"thought":"unsure","action":"ask_user","args":{"question":"Which branch?"}}"#]);
        let (agent_id, task_id) = working_agent(&h, "Merge");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        assert_eq!(agent_loop.cycle(&task_id).await, CycleOutcome::AwaitingInput);

        let task = h.ctx.board.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::AwaitingInput);
        assert_eq!(task.status_message.as_deref(), Some("Which branch?"));
        assert_eq!(h.ctx.board.get_agent(&agent_id).unwrap().status, AgentStatus::Paused);
        assert!(h.memory.all_logs().contains("**Agent asks:** Which branch?"));
    }

    #[tokio::test]
    async fn test_tool_dispatch_consumes_pending_input_and_records_artifact() {
        let h = harness(&[
            r##"{"thought":"write it","action":"write_file","args":{"path":"notes/plan.md","content":"# Plan"}}"##,
        ]);
        let (agent_id, task_id) = working_agent(&h, "Plan");
        h.ctx.board.provide_input(&agent_id, "use markdown");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        let outcome = agent_loop.cycle(&task_id).await;
        assert_eq!(
            outcome,
            CycleOutcome::ToolInvoked {
                tool: "write_file".to_string(),
                is_error: false
            }
        );

        let calls = h.provider.calls();
        assert!(calls[0][0].content.contains("USER MESSAGE: use markdown"));

        let agent = h.ctx.board.get_agent(&agent_id).unwrap();
        assert!(agent.pending_input.is_none());
        assert_eq!(agent.status, AgentStatus::Working);
        assert!(agent_loop.workspace_root.join("notes/plan.md").exists());

        let task = h.ctx.board.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.progress.as_deref(), Some("write it"));
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(task.artifacts[0].locator, "notes/plan.md");
        assert!(h.memory.all_logs().contains("Tool Execution: write_file"));
    }

    #[tokio::test]
    async fn test_failed_tool_is_reported_not_fatal() {
        let h = harness(&[r#"{"action":"read_file","args":{"path":"../../etc/passwd"}}"#]);
        let (agent_id, task_id) = working_agent(&h, "Snoop");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        let outcome = agent_loop.cycle(&task_id).await;
        assert_eq!(
            outcome,
            CycleOutcome::ToolInvoked {
                tool: "read_file".to_string(),
                is_error: true
            }
        );
        assert!(h.memory.all_logs().contains("Access denied"));
        assert!(h.ctx.board.get_task(&task_id).unwrap().artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_changes_nothing() {
        let h = harness(&[r#"{"thought":"check","action":"read_task","args":{}}"#]);
        let (agent_id, task_id) = working_agent(&h, "Anything");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        assert_eq!(
            agent_loop.cycle(&task_id).await,
            CycleOutcome::UnknownAction("read_task".to_string())
        );
        assert_eq!(h.ctx.board.get_task(&task_id).unwrap().status, TaskStatus::InProgress);
        assert_eq!(h.ctx.board.get_agent(&agent_id).unwrap().status, AgentStatus::Working);
    }

    #[tokio::test]
    async fn test_malformed_responses_mark_agent_stuck() {
        let h = harness(&["not json", "still not json", r#"{"thought":"no action"}"#]);
        let (agent_id, task_id) = working_agent(&h, "Confusing");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        assert_eq!(agent_loop.cycle(&task_id).await, CycleOutcome::Malformed);
        assert_eq!(agent_loop.cycle(&task_id).await, CycleOutcome::Malformed);
        assert_eq!(h.ctx.board.get_task(&task_id).unwrap().status, TaskStatus::InProgress);
        assert_eq!(agent_loop.cycle(&task_id).await, CycleOutcome::Stuck);

        let agent = h.ctx.board.get_agent(&agent_id).unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        let task = h.ctx.board.get_task(&task_id).unwrap();
        assert!(task.status_message.unwrap().starts_with("Stuck"));
    }

    #[tokio::test]
    async fn test_valid_reply_resets_malformed_streak() {
        let h = harness(&[
            "oops",
            "oops",
            r#"{"action":"read_task"}"#,
            "oops",
            "oops",
        ]);
        let (agent_id, task_id) = working_agent(&h, "Flaky");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        for _ in 0..5 {
            assert_ne!(agent_loop.cycle(&task_id).await, CycleOutcome::Stuck);
        }
        assert_eq!(h.ctx.board.get_agent(&agent_id).unwrap().status, AgentStatus::Working);
    }

    #[tokio::test]
    async fn test_provider_failure_is_contained() {
        let h = harness(&[]);
        h.provider.push_error("connection refused");
        let (agent_id, task_id) = working_agent(&h, "Offline");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        match agent_loop.cycle(&task_id).await {
            CycleOutcome::Failed(message) => assert!(message.contains("connection refused")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(h.ctx.board.get_agent(&agent_id).unwrap().status, AgentStatus::Working);
    }

    #[tokio::test]
    async fn test_vanished_task_aborts_quietly() {
        let h = harness(&[]);
        let (agent_id, _) = working_agent(&h, "Gone");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        assert_eq!(agent_loop.cycle("no-such-task").await, CycleOutcome::Vanished);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_loop_picks_up_and_completes_tasks() {
        let h = harness(&[]);
        let agent = h.ctx.board.spawn_agent("W", AgentConfig::new("scripted", "m"));
        let a = h.ctx.board.create_task("A", TaskPriority::High, None);
        let b = h.ctx.board.create_task("B", TaskPriority::Medium, None);
        h.ctx.board.add_dependency(&b.id, &a.id);

        let handle = AgentLoop::spawn(h.ctx.clone(), agent.id.clone());
        let board = h.ctx.board.clone();
        eventually(|| {
            board
                .tasks()
                .iter()
                .all(|t| t.status == TaskStatus::Done)
        })
        .await;

        handle.shutdown().await;
        let agent = h.ctx.board.get_agent(&agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        let logs = h.memory.all_logs();
        assert!(logs.find("**Mission:** A").unwrap() < logs.find("**Mission:** B").unwrap());
    }

    #[tokio::test]
    async fn test_paused_loop_resumes_after_input() {
        let h = harness(&[r#"{"action":"ask_user","args":{"question":"Which branch?"}}"#]);
        let agent = h.ctx.board.spawn_agent("W", AgentConfig::new("scripted", "m"));
        let task = h.ctx.board.create_task("Merge", TaskPriority::Medium, None);

        let handle = AgentLoop::spawn(h.ctx.clone(), agent.id.clone());
        let board = h.ctx.board.clone();
        let task_id = task.id.clone();
        eventually(|| board.get_task(&task_id).unwrap().status == TaskStatus::AwaitingInput).await;

        assert!(h.ctx.board.provide_input(&agent.id, "main"));
        eventually(|| board.get_task(&task_id).unwrap().status == TaskStatus::Done).await;

        let calls = h.provider.calls();
        assert!(calls.last().unwrap()[0].content.contains("USER MESSAGE: main"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness(&[]);
        let agent = h.ctx.board.spawn_agent("W", AgentConfig::new("scripted", "m"));

        let handle = AgentLoop::spawn(h.ctx.clone(), agent.id.clone());
        handle.stop();
        handle.stop();
        eventually(|| handle.is_finished()).await;
        handle.stop();
        handle.shutdown().await;

        let agent = h.ctx.board.get_agent(&agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_agent_ends_loop() {
        let h = harness(&[]);
        let handle = AgentLoop::spawn(h.ctx.clone(), "ghost");
        eventually(|| handle.is_finished()).await;
        assert!(!h.ctx.workspaces.workspace_root("ghost").exists());
    }

    #[tokio::test]
    async fn test_board_activity_does_not_shorten_cycle_pause() {
        let settings = LoopSettings {
            cycle_pause_ms: 5_000,
            ..fast_settings()
        };
        let h = harness_with(&[r#"{"thought":"look","action":"read_task","args":{}}"#], settings);
        let (agent_id, _) = working_agent(&h, "Slow and steady");
        let handle = AgentLoop::spawn(h.ctx.clone(), agent_id);

        let provider = h.provider.clone();
        eventually(|| provider.call_count() >= 1).await;
        for i in 0..5 {
            h.ctx.board.create_task(format!("Unrelated {}", i), TaskPriority::Low, None);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(h.provider.call_count(), 1);

        handle.shutdown().await;
    }

    /// Queues another user message while its completion is in flight.
    struct InterruptingProvider {
        target: parking_lot::Mutex<Option<(Arc<Board>, AgentId)>>,
    }

    #[async_trait]
    impl LlmProvider for InterruptingProvider {
        fn name(&self) -> &str {
            "interrupting"
        }

        async fn generate(&self, _messages: &[Message], _config: &GenerationConfig) -> Result<String> {
            let target = self.target.lock().clone();
            if let Some((board, agent_id)) = target {
                board.provide_input(&agent_id, "second message");
            }
            Ok(r#"{"thought":"look","action":"read_file","args":{"path":"missing.txt"}}"#.to_string())
        }
    }

    #[tokio::test]
    async fn test_input_arriving_mid_cycle_survives() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(InterruptingProvider {
            target: parking_lot::Mutex::new(None),
        });
        let mut providers = ProviderRegistry::new();
        providers.register(provider.clone());
        let ctx = Arc::new(AppContext::new(
            providers,
            Arc::new(InMemoryStore::new()),
            WorkspaceManager::new(dir.path()).unwrap(),
            fast_settings(),
        ));

        let agent = ctx.board.spawn_agent("W", AgentConfig::new("interrupting", "m"));
        let task = ctx.board.create_task("Chat", TaskPriority::Medium, None);
        assert!(ctx.board.assign_task(&task.id, &agent.id));
        ctx.board.provide_input(&agent.id, "first message");
        *provider.target.lock() = Some((ctx.board.clone(), agent.id.clone()));

        let mut agent_loop = AgentLoop::new(ctx.clone(), agent.id.clone());
        agent_loop.workspace_root = ctx.workspaces.create_workspace(&agent.id).await.unwrap();
        let outcome = agent_loop.cycle(&task.id).await;
        assert_eq!(
            outcome,
            CycleOutcome::ToolInvoked {
                tool: "read_file".to_string(),
                is_error: true
            }
        );

        let pending = ctx.board.get_agent(&agent.id).unwrap().pending_input;
        assert_eq!(pending.as_deref(), Some("second message"));
    }

    #[tokio::test]
    async fn test_rewritten_file_is_one_artifact() {
        let h = harness(&[
            r#"{"thought":"draft","action":"write_file","args":{"path":"a.txt","content":"v1"}}"#,
            r#"{"thought":"revise","action":"write_file","args":{"path":"./a.txt","content":"v2"}}"#,
        ]);
        let (agent_id, task_id) = working_agent(&h, "Draft");

        let mut agent_loop = bootstrapped(&h, &agent_id).await;
        agent_loop.cycle(&task_id).await;
        agent_loop.cycle(&task_id).await;

        let artifacts = h.ctx.board.get_task(&task_id).unwrap().artifacts;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].locator, "a.txt");
        assert_eq!(
            std::fs::read_to_string(agent_loop.workspace_root.join("a.txt")).unwrap(),
            "v2"
        );
    }
}
