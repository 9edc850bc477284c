use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{AgentLoop, LoopHandle};
use crate::board::AgentId;
use crate::context::AppContext;

/// Starts and stops agent loops; at most one loop per agent.
pub struct LoopSupervisor {
    ctx: Arc<AppContext>,
    loops: Mutex<HashMap<AgentId, LoopHandle>>,
}

impl LoopSupervisor {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the agent's loop. Returns false if one is already running.
    pub fn start(&self, agent_id: &str) -> Result<bool> {
        if self.ctx.board.get_agent(agent_id).is_none() {
            bail!("Agent {} not found", agent_id);
        }

        let mut loops = self.loops.lock();
        if matches!(loops.get(agent_id), Some(handle) if !handle.is_finished()) {
            return Ok(false);
        }
        loops.insert(
            agent_id.to_string(),
            AgentLoop::spawn(self.ctx.clone(), agent_id),
        );
        info!(agent_id = %agent_id, "Agent loop started");
        Ok(true)
    }

    /// Stops the agent's loop and waits for it to exit. Stopping an agent
    /// without a loop is a no-op that returns false.
    pub async fn stop(&self, agent_id: &str) -> bool {
        let handle = self.loops.lock().remove(agent_id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, agent_id: &str) -> bool {
        matches!(self.loops.lock().get(agent_id), Some(handle) if !handle.is_finished())
    }

    pub fn running_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .loops
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .map(|handle| handle.agent_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub async fn stop_all(&self) {
        let handles: Vec<LoopHandle> = self.loops.lock().drain().map(|(_, handle)| handle).collect();
        if handles.is_empty() {
            return;
        }
        info!("Stopping {} agent loops", handles.len());
        futures::future::join_all(handles.into_iter().map(LoopHandle::shutdown)).await;
    }
}
