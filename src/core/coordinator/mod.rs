/// Cooperative cancellation
mod cancel;
/// The agent loop and its step handlers
mod execution;
/// Terminal outcomes and persistence failures
mod outcome;
/// Arena of active execution contexts
mod registry;
/// Resuming parked loops: answers, approvals, messages and restart recovery
mod resume;

use crate::agents::AgentStepProvider;
use crate::config::CoordinatorConfig;
use crate::constants::DEFAULT_AUTO_ANSWER;
use crate::core::{
    ApprovalStatus, DetailedStatus, Interaction, InteractionLog, InteractionQuery, NewTask,
    StatusChange, Task, TaskFilter, ToolApprovalRequest,
};
use crate::db::Repository;
use crate::errors::Error;
use crate::event::{EventKind, Notifier};
use crate::tools::ToolInvoker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use registry::{ActiveContexts, ExecutionContext};

/// Tunables of the coordinator resolved from configuration
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub step_timeout: Duration,
    pub tool_timeout: Duration,
    /// `{question}` is replaced by the skipped question
    pub auto_answer: String,
}

impl CoordinatorSettings {
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, Error> {
        Ok(Self {
            step_timeout: config.step_timeout()?,
            tool_timeout: config.tool_timeout()?,
            auto_answer: config.auto_answer.clone(),
        })
    }

    pub fn auto_answer_for(&self, question: &str) -> String {
        self.auto_answer.replace("{question}", question)
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            auto_answer: DEFAULT_AUTO_ANSWER.to_string(),
        }
    }
}

/// Runs one agent loop per active task and owns every status change
///
/// Cloning is cheap; clones share the repository, collaborators and the
/// registry of active contexts.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    repository: Arc<dyn Repository>,
    log: InteractionLog,
    agent: Arc<dyn AgentStepProvider>,
    tools: Arc<dyn ToolInvoker>,
    notifier: Arc<dyn Notifier>,
    contexts: ActiveContexts,
    settings: CoordinatorSettings,
}

impl ExecutionCoordinator {
    /// Creates a new ExecutionCoordinator
    ///
    /// # Arguments
    /// * `repository` - Durable storage for tasks, interactions and approvals
    /// * `agent` - Provider of the next agent step
    /// * `tools` - Tool invoker and permission oracle
    /// * `notifier` - Sink for task events
    /// * `settings` - Timeouts and the auto-mode answer template
    pub fn new(
        repository: Arc<dyn Repository>,
        agent: Arc<dyn AgentStepProvider>,
        tools: Arc<dyn ToolInvoker>,
        notifier: Arc<dyn Notifier>,
        settings: CoordinatorSettings,
    ) -> Self {
        let log = InteractionLog::new(repository.clone(), notifier.clone());
        Self {
            repository,
            log,
            agent,
            tools,
            notifier,
            contexts: ActiveContexts::default(),
            settings,
        }
    }

    pub fn log(&self) -> &InteractionLog {
        &self.log
    }

    /// Whether a loop currently drives `task_id`
    pub fn is_running(&self, task_id: &str) -> bool {
        self.contexts.is_active(task_id)
    }

    pub fn create_task(&self, new: NewTask) -> Result<Task, Error> {
        let task = new.into_task();
        self.repository.insert_task(&task)?;
        info!("Created task {} ({})", task.id, task.title);
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task, Error> {
        self.repository.get_task(task_id)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, Error> {
        self.repository.list_tasks(filter)
    }

    /// Deletes a task that is neither running nor waiting
    pub fn delete_task(&self, task_id: &str) -> Result<(), Error> {
        if self.contexts.is_active(task_id) {
            let task = self.repository.get_task(task_id)?;
            return Err(Error::invalid_transition(task.detailed_status, "delete"));
        }
        self.repository.delete_task(task_id)?;
        info!("Deleted task {}", task_id);
        Ok(())
    }

    pub fn interactions(
        &self,
        task_id: &str,
        query: &InteractionQuery,
    ) -> Result<Vec<Interaction>, Error> {
        self.repository.get_task(task_id)?;
        self.log.fetch(task_id, query)
    }

    pub fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        task_id: Option<&str>,
    ) -> Result<Vec<ToolApprovalRequest>, Error> {
        self.repository.list_approvals(status, task_id)
    }

    pub fn get_approval(&self, request_id: &str) -> Result<ToolApprovalRequest, Error> {
        self.repository.get_approval(request_id)
    }

    /// Flips the auto-mode flag
    ///
    /// Only suspension points reached afterwards see the new value; a question
    /// already waiting for a human keeps waiting.
    pub fn toggle_auto_mode(&self, task_id: &str) -> Result<Task, Error> {
        let task = self.repository.toggle_auto_mode(task_id)?;
        info!("Task {} auto mode is now {}", task_id, task.auto_mode);
        self.notifier.publish(
            task_id,
            EventKind::AutoModeToggled {
                auto_mode: task.auto_mode,
            },
        );
        Ok(task)
    }

    /// Applies a compare-and-set status change and publishes it
    fn transition(&self, task_id: &str, change: &StatusChange) -> Result<Task, Error> {
        let task = self.repository.transition_status(task_id, change)?;
        debug!(
            "Task {} {} -> {} on {}",
            task_id, change.expected, task.detailed_status, change.event
        );
        self.publish_status(task_id, task.detailed_status);
        Ok(task)
    }

    fn publish_status(&self, task_id: &str, detailed_status: DetailedStatus) {
        self.notifier
            .publish(task_id, EventKind::StatusChanged { detailed_status });
    }
}
