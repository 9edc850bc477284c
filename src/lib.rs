pub mod agent_loop;
pub mod board;
pub mod config;
pub mod context;
pub mod gateway;
pub mod memory;
pub mod providers;
pub mod tools;
pub mod workspace;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent_loop::LoopSupervisor;
use crate::config::AgentBoardConfig;
use crate::context::AppContext;

pub async fn run() -> Result<()> {
    let config = AgentBoardConfig::load()?;
    let ctx = Arc::new(AppContext::from_config(&config).await?);

    let agent_ids = ctx.seed(&config);
    info!(
        "Board seeded with {} agents and {} tasks",
        agent_ids.len(),
        ctx.board.tasks().len()
    );

    let supervisor = LoopSupervisor::new(ctx.clone());
    for agent_id in &agent_ids {
        if let Err(e) = supervisor.start(agent_id) {
            warn!("Could not start agent {}: {:#}", agent_id, e);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    supervisor.stop_all().await;
    ctx.gateway.disconnect_all().await;
    Ok(())
}
