//! Core module containing the task execution system
//!
//! This module contains:
//! - The task model and its lifecycle state machine
//! - The append-only interaction log and approval requests
//! - The per-task execution log of run milestones
//! - The execution coordinator that drives one agent loop per task
//! - The client-side synchronization protocol over the log

mod approval;
mod continuation;
pub mod coordinator;
mod execution_log;
mod interaction;
mod interaction_log;
pub mod sync;
mod task;
mod task_state;

pub use approval::*;
pub use continuation::*;
pub use coordinator::{CoordinatorSettings, ExecutionCoordinator};
pub use execution_log::*;
pub use interaction::*;
pub use interaction_log::*;
pub use task::*;
pub use task_state::*;
