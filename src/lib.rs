//! Task execution coordinator for autonomous agents.
//!
//! A task is handed to an agent loop that can stop to ask a human a question
//! or to request approval for a tool, and pick up again once the human acts.
//! Everything the loop does is recorded in an append-only interaction log
//! that observers read through full fetches and cursor-based diffs.

pub mod agents;
pub mod api;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod db;
pub mod errors;
pub mod event;
pub mod schema;
pub mod tools;
pub mod utils;

use crate::agents::ScriptedAgent;
use crate::config::AppConfig;
use crate::core::{CoordinatorSettings, ExecutionCoordinator};
use crate::errors::Error;
use crate::event::EventBus;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Wires storage, the scripted agent, the tool registry and the event bus
/// into a coordinator
///
/// # Errors
///
/// * `Error::Config` for unparsable timeouts
/// * `Error::RepositoryUnavailable` if the database cannot be opened
pub fn build_coordinator(config: &AppConfig, bus: &EventBus) -> Result<ExecutionCoordinator, Error> {
    let settings = CoordinatorSettings::from_config(&config.coordinator)?;
    let repository = db::open_repository(&config.storage)?;
    let agent = Arc::new(ScriptedAgent::from_profiles(&config.agents));
    let tools = Arc::new(ToolRegistry::new(&config.tools, &config.agents));

    Ok(ExecutionCoordinator::new(
        repository,
        agent,
        tools,
        Arc::new(bus.clone()),
        settings,
    ))
}
