//! The authoritative in-memory registry of tasks and agents.
//!
//! Every public operation takes the single state lock for its whole duration,
//! so compound task+agent updates (assignment, completion, pausing) are never
//! observed half-applied by another agent loop.

pub mod types;

pub use types::*;

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BoardError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {0} has dependencies that are not DONE")]
    DependenciesPending(TaskId),
}

#[derive(Debug, Default)]
struct BoardState {
    tasks: HashMap<TaskId, Task>,
    task_order: Vec<TaskId>,
    agents: HashMap<AgentId, Agent>,
    agent_order: Vec<AgentId>,
}

impl BoardState {
    fn dependencies_done(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep_id| {
            matches!(self.tasks.get(dep_id), Some(dep) if dep.status == TaskStatus::Done)
        })
    }

    fn try_assign(&mut self, task_id: &str, agent_id: &str) -> bool {
        let agent_idle = matches!(
            self.agents.get(agent_id),
            Some(agent) if agent.status == AgentStatus::Idle
        );
        let task_ready = match self.tasks.get(task_id) {
            Some(task) => task.status == TaskStatus::Todo && self.dependencies_done(task),
            None => false,
        };
        if !agent_idle || !task_ready {
            return false;
        }

        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = TaskStatus::InProgress;
            task.assigned_agent_id = Some(agent_id.to_string());
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Working;
            agent.current_task_id = Some(task_id.to_string());
        }
        true
    }

    /// Returns the agent to IDLE if it is still holding `task_id`.
    fn release_agent(&mut self, agent_id: &str, task_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            if agent.current_task_id.as_deref() == Some(task_id) {
                agent.status = AgentStatus::Idle;
                agent.current_task_id = None;
                agent.pending_input = None;
            }
        }
    }

    /// Depth-first walk through dependencies looking for a path back to `start`.
    fn find_cycle(&self, start: &str) -> Option<Vec<TaskId>> {
        let mut visited = HashSet::new();
        let mut stack = vec![vec![start.to_string()]];

        while let Some(path) = stack.pop() {
            let Some(current) = path.last() else { continue };
            let Some(task) = self.tasks.get(current) else { continue };
            for dep_id in &task.dependencies {
                if dep_id == start {
                    return Some(path.clone());
                }
                if visited.insert(dep_id.clone()) {
                    let mut next = path.clone();
                    next.push(dep_id.clone());
                    stack.push(next);
                }
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct Board {
    state: Mutex<BoardState>,
    changed: Notify,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signalled whenever a task becomes assignable or a paused agent is resumed.
    pub fn changed(&self) -> &Notify {
        &self.changed
    }

    fn notify(&self) {
        self.changed.notify_waiters();
    }

    // --- Tasks ---

    /// Creates a TODO task. An unknown `parent_id` is ignored and the task is
    /// created standalone.
    pub fn create_task(
        &self,
        title: impl Into<String>,
        priority: TaskPriority,
        parent_id: Option<&str>,
    ) -> Task {
        let task = {
            let mut state = self.state.lock();
            let id = uuid::Uuid::new_v4().to_string();

            let parent_id = match parent_id {
                Some(parent_id) => match state.tasks.get_mut(parent_id) {
                    Some(parent) => {
                        parent.subtasks.push(id.clone());
                        Some(parent_id.to_string())
                    }
                    None => {
                        debug!("Parent task {} not found, creating standalone task", parent_id);
                        None
                    }
                },
                None => None,
            };

            let task = Task {
                id: id.clone(),
                title: title.into(),
                priority,
                status: TaskStatus::Todo,
                dependencies: Vec::new(),
                parent_id,
                subtasks: Vec::new(),
                assigned_agent_id: None,
                status_message: None,
                progress: None,
                result: None,
                artifacts: Vec::new(),
            };
            state.tasks.insert(id.clone(), task.clone());
            state.task_order.push(id);
            task
        };
        self.notify();
        task
    }

    /// Records that `task_id` cannot start before `dependency_id` is DONE.
    ///
    /// Cycles are accepted; the tasks involved can then never be assigned, so a
    /// warning naming them is logged.
    pub fn add_dependency(&self, task_id: &str, dependency_id: &str) -> bool {
        let mut state = self.state.lock();
        if task_id == dependency_id || !state.tasks.contains_key(dependency_id) {
            return false;
        }
        let Some(task) = state.tasks.get_mut(task_id) else {
            return false;
        };
        if task.dependencies.iter().any(|d| d == dependency_id) {
            return false;
        }
        task.dependencies.push(dependency_id.to_string());

        if let Some(cycle) = state.find_cycle(task_id) {
            warn!(
                "Dependency cycle formed, these tasks can never be assigned: {}",
                cycle.join(" -> ")
            );
        }
        true
    }

    /// Returns the chain of task ids leading from `task_id` back to itself, if any.
    pub fn dependency_cycle(&self, task_id: &str) -> Option<Vec<TaskId>> {
        self.state.lock().find_cycle(task_id)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.state.lock().tasks.get(id).cloned()
    }

    /// All tasks in creation order.
    pub fn tasks(&self) -> Vec<Task> {
        let state = self.state.lock();
        state
            .task_order
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    /// Sets a task's status directly.
    ///
    /// Moving a task into IN_PROGRESS requires every dependency to be DONE.
    /// Moving an active task to any other status releases the agent holding
    /// it; a task sent back to TODO also loses its assignment.
    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        status_message: Option<String>,
        result: Option<String>,
    ) -> Result<Task, BoardError> {
        let updated = {
            let mut state = self.state.lock();
            let task = state
                .tasks
                .get(id)
                .ok_or_else(|| BoardError::TaskNotFound(id.to_string()))?;
            if status == TaskStatus::InProgress && !task.status.is_active() && !state.dependencies_done(task) {
                return Err(BoardError::DependenciesPending(id.to_string()));
            }
            let released = (task.status.is_active() && !status.is_active())
                .then(|| task.assigned_agent_id.clone())
                .flatten();

            let Some(task) = state.tasks.get_mut(id) else {
                return Err(BoardError::TaskNotFound(id.to_string()));
            };
            task.status = status;
            if status_message.is_some() {
                task.status_message = status_message;
            }
            if result.is_some() {
                task.result = result;
            }
            if status == TaskStatus::Todo {
                task.assigned_agent_id = None;
            }
            let updated = task.clone();

            if let Some(agent_id) = released {
                debug!("Task {} left {:?}, releasing agent {}", id, updated.status, agent_id);
                state.release_agent(&agent_id, id);
            }
            updated
        };
        self.notify();
        Ok(updated)
    }

    pub fn update_task_progress(&self, id: &str, progress: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.tasks.get_mut(id) {
            Some(task) => {
                task.progress = Some(progress.into());
                true
            }
            None => false,
        }
    }

    /// Attaches an artifact unless one with the same locator is already recorded.
    pub fn add_artifact(&self, id: &str, artifact: Artifact) -> bool {
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return false;
        };
        if !task.artifacts.iter().any(|a| a.locator == artifact.locator) {
            task.artifacts.push(artifact);
        }
        true
    }

    /// Moves a task to ARCHIVED. Tasks an agent is working on cannot be archived.
    pub fn archive_task(&self, id: &str) -> Option<Task> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(id)?;
        if task.status.is_active() {
            return None;
        }
        task.status = TaskStatus::Archived;
        Some(task.clone())
    }

    // --- Agents ---

    pub fn spawn_agent(&self, name: impl Into<String>, config: AgentConfig) -> Agent {
        let mut state = self.state.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let agent = Agent {
            id: id.clone(),
            name: name.into(),
            status: AgentStatus::Idle,
            config,
            current_task_id: None,
            current_activity: None,
            pending_input: None,
        };
        state.agents.insert(id.clone(), agent.clone());
        state.agent_order.push(id);
        agent
    }

    pub fn get_agent(&self, id: &str) -> Option<Agent> {
        self.state.lock().agents.get(id).cloned()
    }

    /// All agents in spawn order.
    pub fn agents(&self) -> Vec<Agent> {
        let state = self.state.lock();
        state
            .agent_order
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    pub fn update_agent_activity(&self, id: &str, activity: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.agents.get_mut(id) {
            Some(agent) => {
                agent.current_activity = Some(activity.into());
                true
            }
            None => false,
        }
    }

    /// Queues a user message for the agent. An agent paused on a question is
    /// resumed so its next cycle can address the answer.
    pub fn provide_input(&self, agent_id: &str, input: impl Into<String>) -> bool {
        let resumed = {
            let mut state = self.state.lock();
            let Some(agent) = state.agents.get_mut(agent_id) else {
                return false;
            };
            agent.pending_input = Some(input.into());

            let paused_task = match (agent.status, agent.current_task_id.clone()) {
                (AgentStatus::Paused, Some(task_id)) => Some(task_id),
                _ => None,
            };
            let resumable = paused_task.filter(|task_id| {
                matches!(
                    state.tasks.get(task_id),
                    Some(task) if task.status == TaskStatus::AwaitingInput
                )
            });

            match resumable {
                Some(task_id) => {
                    if let Some(task) = state.tasks.get_mut(&task_id) {
                        task.status = TaskStatus::InProgress;
                        task.status_message = None;
                    }
                    if let Some(agent) = state.agents.get_mut(agent_id) {
                        agent.status = AgentStatus::Working;
                    }
                    true
                }
                None => false,
            }
        };
        if resumed {
            info!("Agent {} resumed with user input", agent_id);
            self.notify();
        }
        true
    }

    pub fn clear_agent_input(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.agents.get_mut(id) {
            Some(agent) => {
                agent.pending_input = None;
                true
            }
            None => false,
        }
    }

    /// Clears the agent's pending input only if it is still `expected`, so a
    /// message queued after that snapshot waits for the next cycle.
    pub fn consume_agent_input(&self, agent_id: &str, expected: &str) -> bool {
        let mut state = self.state.lock();
        match state.agents.get_mut(agent_id) {
            Some(agent) if agent.pending_input.as_deref() == Some(expected) => {
                agent.pending_input = None;
                true
            }
            _ => false,
        }
    }

    // --- Assignment ---

    /// Assigns a TODO task to an IDLE agent once every dependency is DONE.
    /// Nothing is mutated when any precondition fails.
    pub fn assign_task(&self, task_id: &str, agent_id: &str) -> bool {
        self.state.lock().try_assign(task_id, agent_id)
    }

    /// Picks the highest-priority TODO task whose dependencies are satisfied.
    /// Ties keep creation order.
    pub fn assign_next_task(&self, agent_id: &str) -> Option<Task> {
        let mut state = self.state.lock();
        if !matches!(state.agents.get(agent_id), Some(agent) if agent.status == AgentStatus::Idle) {
            return None;
        }

        let mut candidates: Vec<(TaskId, TaskPriority)> = state
            .task_order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| task.status == TaskStatus::Todo)
            .map(|task| (task.id.clone(), task.priority))
            .collect();
        candidates.sort_by_key(|(_, priority)| std::cmp::Reverse(priority.weight()));

        for (task_id, _) in candidates {
            if state.try_assign(&task_id, agent_id) {
                return state.tasks.get(&task_id).cloned();
            }
        }
        None
    }

    /// Marks the task DONE and returns the agent to IDLE with no task or input.
    pub fn complete_task(&self, task_id: &str, agent_id: &str, result: Option<String>) -> bool {
        {
            let mut state = self.state.lock();
            let Some(task) = state.tasks.get_mut(task_id) else {
                return false;
            };
            task.status = TaskStatus::Done;
            task.status_message = None;
            if result.is_some() {
                task.result = result;
            }
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.status = AgentStatus::Idle;
                agent.current_task_id = None;
                agent.pending_input = None;
            }
        }
        self.notify();
        true
    }

    /// Parks the task on a question for the user and pauses the agent.
    pub fn request_input(&self, task_id: &str, agent_id: &str, question: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get_mut(task_id) else {
            return false;
        };
        task.status = TaskStatus::AwaitingInput;
        task.status_message = Some(question.into());
        if let Some(agent) = state.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Paused;
        }
        true
    }

    /// Puts the agent in ERROR; its task keeps the assignment so an operator
    /// can inspect it before calling [`Board::reset_agent`].
    pub fn mark_agent_stuck(&self, agent_id: &str, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return false;
        };
        let reason = reason.into();
        agent.status = AgentStatus::Error;
        agent.current_activity = Some(reason.clone());
        let task_id = agent.current_task_id.clone();
        if let Some(task) = task_id.and_then(|id| state.tasks.get_mut(&id)) {
            task.status_message = Some(reason);
        }
        true
    }

    /// Returns the agent to IDLE and releases its current task back to TODO.
    pub fn reset_agent(&self, agent_id: &str) -> bool {
        {
            let mut state = self.state.lock();
            let Some(agent) = state.agents.get_mut(agent_id) else {
                return false;
            };
            let task_id = agent.current_task_id.take();
            agent.status = AgentStatus::Idle;
            agent.pending_input = None;
            agent.current_activity = None;

            if let Some(task) = task_id.and_then(|id| state.tasks.get_mut(&id)) {
                if task.status.is_active() {
                    task.status = TaskStatus::Todo;
                    task.status_message = None;
                }
                task.assigned_agent_id = None;
            }
        }
        self.notify();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_config() -> AgentConfig {
        AgentConfig::new("mock", "mock-model")
    }

    #[test]
    fn test_create_task_defaults() {
        let board = Board::new();
        let task = board.create_task("Write docs", TaskPriority::default(), None);

        assert_eq!(task.title, "Write docs");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.dependencies.is_empty());
        assert!(task.subtasks.is_empty());
        assert_eq!(board.tasks().len(), 1);
    }

    #[test]
    fn test_create_subtask_links_parent() {
        let board = Board::new();
        let parent = board.create_task("Parent", TaskPriority::High, None);
        let child = board.create_task("Child", TaskPriority::Low, Some(&parent.id));

        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(board.get_task(&parent.id).unwrap().subtasks, vec![child.id]);
    }

    #[test]
    fn test_unknown_parent_is_ignored() {
        let board = Board::new();
        let task = board.create_task("Orphan", TaskPriority::Medium, Some("missing"));
        assert!(task.parent_id.is_none());
        assert!(board.get_task(&task.id).is_some());
    }

    #[test]
    fn test_add_dependency_rules() {
        let board = Board::new();
        let a = board.create_task("A", TaskPriority::Medium, None);
        let b = board.create_task("B", TaskPriority::Medium, None);

        assert!(!board.add_dependency(&a.id, &a.id));
        assert!(!board.add_dependency(&a.id, "missing"));
        assert!(!board.add_dependency("missing", &a.id));
        assert!(board.add_dependency(&b.id, &a.id));
        assert!(!board.add_dependency(&b.id, &a.id));
        assert_eq!(board.get_task(&b.id).unwrap().dependencies, vec![a.id]);
    }

    #[test]
    fn test_cycles_are_accepted_but_block_assignment() {
        let board = Board::new();
        let a = board.create_task("A", TaskPriority::High, None);
        let b = board.create_task("B", TaskPriority::High, None);
        let agent = board.spawn_agent("W", agent_config());

        assert!(board.add_dependency(&a.id, &b.id));
        assert!(board.dependency_cycle(&a.id).is_none());
        assert!(board.add_dependency(&b.id, &a.id));

        let cycle = board.dependency_cycle(&a.id).unwrap();
        assert_eq!(cycle, vec![a.id.clone(), b.id.clone()]);
        assert!(board.assign_next_task(&agent.id).is_none());
    }

    #[test]
    fn test_spawn_agent_starts_idle() {
        let board = Board::new();
        let agent = board.spawn_agent("Worker", agent_config());
        let fetched = board.get_agent(&agent.id).unwrap();

        assert_eq!(fetched.name, "Worker");
        assert_eq!(fetched.status, AgentStatus::Idle);
        assert!(fetched.current_task_id.is_none());
        assert_eq!(fetched.config, agent_config());
    }

    #[test]
    fn test_assign_task_sets_both_sides() {
        let board = Board::new();
        let task = board.create_task("Task 1", TaskPriority::Medium, None);
        let agent = board.spawn_agent("Agent 1", agent_config());

        assert!(board.assign_task(&task.id, &agent.id));

        let task = board.get_task(&task.id).unwrap();
        let agent = board.get_agent(&agent.id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_agent_id.as_deref(), Some(agent.id.as_str()));
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.current_task_id.as_deref(), Some(task.id.as_str()));
    }

    #[test]
    fn test_assign_task_rejects_busy_agent_and_non_todo_task() {
        let board = Board::new();
        let first = board.create_task("First", TaskPriority::Medium, None);
        let second = board.create_task("Second", TaskPriority::Medium, None);
        let agent = board.spawn_agent("A", agent_config());
        let other = board.spawn_agent("B", agent_config());

        assert!(board.assign_task(&first.id, &agent.id));
        assert!(!board.assign_task(&second.id, &agent.id));
        assert!(!board.assign_task(&first.id, &other.id));
        assert_eq!(board.get_task(&second.id).unwrap().status, TaskStatus::Todo);
        assert_eq!(board.get_agent(&other.id).unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn test_single_unfinished_dependency_blocks_assignment() {
        let board = Board::new();
        let dep_a = board.create_task("Dep A", TaskPriority::Medium, None);
        let dep_b = board.create_task("Dep B", TaskPriority::Medium, None);
        let task = board.create_task("Blocked", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());

        board.add_dependency(&task.id, &dep_a.id);
        board.add_dependency(&task.id, &dep_b.id);
        board.update_task_status(&dep_a.id, TaskStatus::Done, None, None).unwrap();

        assert!(!board.assign_task(&task.id, &agent.id));
        assert_eq!(board.get_task(&task.id).unwrap().status, TaskStatus::Todo);
        assert_eq!(board.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);

        board.update_task_status(&dep_b.id, TaskStatus::Done, None, None).unwrap();
        assert!(board.assign_task(&task.id, &agent.id));
    }

    #[test]
    fn test_assign_next_prefers_high_priority() {
        let board = Board::new();
        board.create_task("Low", TaskPriority::Low, None);
        let high = board.create_task("High", TaskPriority::High, None);
        let agent = board.spawn_agent("W", agent_config());

        let picked = board.assign_next_task(&agent.id).unwrap();
        assert_eq!(picked.id, high.id);
        assert_eq!(picked.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_assign_next_keeps_creation_order_on_ties() {
        let board = Board::new();
        let first = board.create_task("First", TaskPriority::Medium, None);
        board.create_task("Second", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());

        assert_eq!(board.assign_next_task(&agent.id).unwrap().id, first.id);
    }

    #[test]
    fn test_assign_next_returns_none_for_busy_agent() {
        let board = Board::new();
        board.create_task("One", TaskPriority::Medium, None);
        board.create_task("Two", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());

        assert!(board.assign_next_task(&agent.id).is_some());
        assert!(board.assign_next_task(&agent.id).is_none());
        assert!(board.assign_next_task("missing").is_none());
    }

    #[test]
    fn test_dependency_scenario_across_agents() {
        let board = Board::new();
        let a = board.create_task("A", TaskPriority::High, None);
        let b = board.create_task("B", TaskPriority::Medium, None);
        board.add_dependency(&b.id, &a.id);
        let w = board.spawn_agent("W", agent_config());
        let v = board.spawn_agent("V", agent_config());

        assert_eq!(board.assign_next_task(&w.id).unwrap().id, a.id);
        assert!(board.assign_next_task(&v.id).is_none());

        board.update_task_status(&a.id, TaskStatus::Done, None, None).unwrap();
        assert_eq!(board.assign_next_task(&v.id).unwrap().id, b.id);
    }

    #[test]
    fn test_complete_task_resets_agent() {
        let board = Board::new();
        let task = board.create_task("T", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());
        board.assign_task(&task.id, &agent.id);
        board.provide_input(&agent.id, "hurry up");

        assert!(board.complete_task(&task.id, &agent.id, Some("shipped".into())));

        let task = board.get_task(&task.id).unwrap();
        let agent = board.get_agent(&agent.id).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result.as_deref(), Some("shipped"));
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert!(agent.pending_input.is_none());
    }

    #[test]
    fn test_request_input_then_resume() {
        let board = Board::new();
        let task = board.create_task("T", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());
        board.assign_task(&task.id, &agent.id);

        assert!(board.request_input(&task.id, &agent.id, "Which branch?"));
        let paused = board.get_task(&task.id).unwrap();
        assert_eq!(paused.status, TaskStatus::AwaitingInput);
        assert_eq!(paused.status_message.as_deref(), Some("Which branch?"));
        assert_eq!(board.get_agent(&agent.id).unwrap().status, AgentStatus::Paused);

        assert!(board.provide_input(&agent.id, "main"));
        let resumed = board.get_agent(&agent.id).unwrap();
        assert_eq!(resumed.status, AgentStatus::Working);
        assert_eq!(resumed.pending_input.as_deref(), Some("main"));
        assert_eq!(board.get_task(&task.id).unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn test_provide_input_to_working_agent_only_queues() {
        let board = Board::new();
        let task = board.create_task("T", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());
        board.assign_task(&task.id, &agent.id);

        assert!(board.provide_input(&agent.id, "also add tests"));
        let agent = board.get_agent(&agent.id).unwrap();
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.pending_input.as_deref(), Some("also add tests"));
        assert!(!board.provide_input("missing", "hello"));
    }

    #[test]
    fn test_archive_refuses_active_tasks() {
        let board = Board::new();
        let task = board.create_task("T", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());
        board.assign_task(&task.id, &agent.id);

        assert!(board.archive_task(&task.id).is_none());
        board.complete_task(&task.id, &agent.id, None);
        assert_eq!(board.archive_task(&task.id).unwrap().status, TaskStatus::Archived);
    }

    #[test]
    fn test_stuck_agent_reset_releases_task() {
        let board = Board::new();
        let task = board.create_task("T", TaskPriority::Medium, None);
        let agent = board.spawn_agent("W", agent_config());
        board.assign_task(&task.id, &agent.id);

        board.mark_agent_stuck(&agent.id, "too many malformed responses");
        assert_eq!(board.get_agent(&agent.id).unwrap().status, AgentStatus::Error);
        assert_eq!(
            board.get_task(&task.id).unwrap().status_message.as_deref(),
            Some("too many malformed responses")
        );

        assert!(board.reset_agent(&agent.id));
        let task = board.get_task(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.assigned_agent_id.is_none());
        assert_eq!(board.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn test_artifacts_are_deduplicated_by_locator() {
        let board = Board::new();
        let task = board.create_task("T", TaskPriority::Medium, None);

        board.add_artifact(&task.id, Artifact::new("a.txt", ArtifactKind::File, "/ws/a.txt"));
        board.add_artifact(&task.id, Artifact::new("a.txt", ArtifactKind::File, "/ws/a.txt"));
        board.add_artifact(&task.id, Artifact::new("b.txt", ArtifactKind::File, "/ws/b.txt"));

        assert_eq!(board.get_task(&task.id).unwrap().artifacts.len(), 2);
    }

    #[test]
    fn test_consume_input_keeps_newer_message() {
        let board = Board::new();
        let agent = board.spawn_agent("W", agent_config());
        board.provide_input(&agent.id, "first");
        board.provide_input(&agent.id, "second");

        assert!(!board.consume_agent_input(&agent.id, "first"));
        assert_eq!(board.get_agent(&agent.id).unwrap().pending_input.as_deref(), Some("second"));

        assert!(board.consume_agent_input(&agent.id, "second"));
        assert!(board.get_agent(&agent.id).unwrap().pending_input.is_none());
        assert!(!board.consume_agent_input("missing", "second"));
    }

    #[test]
    fn test_status_update_refuses_in_progress_with_open_dependencies() {
        let board = Board::new();
        let dep = board.create_task("Dep", TaskPriority::Medium, None);
        let task = board.create_task("Main", TaskPriority::Medium, None);
        assert!(board.add_dependency(&task.id, &dep.id));

        let err = board
            .update_task_status(&task.id, TaskStatus::InProgress, None, None)
            .unwrap_err();
        assert_eq!(err, BoardError::DependenciesPending(task.id.clone()));
        assert_eq!(board.get_task(&task.id).unwrap().status, TaskStatus::Todo);

        board.update_task_status(&dep.id, TaskStatus::Done, None, None).unwrap();
        let started = board
            .update_task_status(&task.id, TaskStatus::InProgress, None, None)
            .unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);

        let missing = board
            .update_task_status("missing", TaskStatus::Done, None, None)
            .unwrap_err();
        assert_eq!(missing, BoardError::TaskNotFound("missing".to_string()));
    }

    #[test]
    fn test_status_update_releases_agent_of_finished_task() {
        let board = Board::new();
        let agent = board.spawn_agent("W", agent_config());
        let task = board.create_task("Job", TaskPriority::Medium, None);
        assert!(board.assign_task(&task.id, &agent.id));
        board.provide_input(&agent.id, "hint");

        let done = board
            .update_task_status(&task.id, TaskStatus::Done, None, Some("manual".to_string()))
            .unwrap();
        assert_eq!(done.result.as_deref(), Some("manual"));

        let agent_after = board.get_agent(&agent.id).unwrap();
        assert_eq!(agent_after.status, AgentStatus::Idle);
        assert!(agent_after.current_task_id.is_none());
        assert!(agent_after.pending_input.is_none());
    }

    #[test]
    fn test_status_update_back_to_todo_clears_assignment() {
        let board = Board::new();
        let agent = board.spawn_agent("W", agent_config());
        let task = board.create_task("Job", TaskPriority::Medium, None);
        assert!(board.assign_task(&task.id, &agent.id));

        let todo = board.update_task_status(&task.id, TaskStatus::Todo, None, None).unwrap();
        assert!(todo.assigned_agent_id.is_none());
        assert_eq!(board.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);

        // The task can be picked up again.
        assert!(board.assign_task(&task.id, &agent.id));
    }
}
