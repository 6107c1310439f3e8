use super::execution::StepFlow;
use super::registry::ExecutionContext;
use super::ExecutionCoordinator;
use crate::core::{
    Continuation, DetailedStatus, ExecutionRecord, InteractionBody, LifecycleEvent,
    NewExecutionRecord, NewInteraction, StatusChange, Task,
};
use crate::errors::Error;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

impl ExecutionCoordinator {
    /// Records the agent's result and moves the task to `completed`
    pub(super) async fn complete(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &Continuation,
        result: Value,
    ) -> Result<StepFlow, Error> {
        let Some(_gate) = context.exclusive().await else {
            return Ok(StepFlow::Stop);
        };

        let text = match &result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.log.append(NewInteraction::new(
            task_id,
            InteractionBody::Result {
                text,
                metadata: json!({ "result": result.clone() }),
            },
        ))?;
        self.repository.save_continuation(task_id, continuation)?;

        let change = StatusChange::new(DetailedStatus::Running, LifecycleEvent::Succeed)?
            .with_result(result);
        let task = self
            .contexts
            .settle(task_id, context, || self.transition(task_id, &change))?;
        self.record_milestone(&task);
        info!("Task {} completed", task_id);
        Ok(StepFlow::Stop)
    }

    /// Records a failure reported by the agent and moves the task to `failed`
    ///
    /// Failures are never retried here; a new `execute` call starts again
    /// from the persisted conversation.
    pub(super) async fn fail(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &Continuation,
        message: &str,
    ) -> Result<StepFlow, Error> {
        let Some(_gate) = context.exclusive().await else {
            return Ok(StepFlow::Stop);
        };

        self.log.append(NewInteraction::error(task_id, message))?;
        self.repository.save_continuation(task_id, continuation)?;

        let change = StatusChange::new(DetailedStatus::Running, LifecycleEvent::Fail)?
            .with_error(message);
        let task = self
            .contexts
            .settle(task_id, context, || self.transition(task_id, &change))?;
        self.record_milestone(&task);
        warn!("Task {} failed: {}", task_id, message);
        Ok(StepFlow::Stop)
    }

    /// Best-effort failure path for errors the loop cannot narrate itself
    ///
    /// The error is recorded as an `error` interaction if storage allows it,
    /// then the task is moved to `failed`.
    pub(super) async fn abort(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        cause: &Error,
    ) {
        error!("Task {} aborted: {}", task_id, cause);
        let Some(_gate) = context.exclusive().await else {
            return;
        };

        let message = cause.to_string();
        if let Err(e) = self.log.append(NewInteraction::error(task_id, &message)) {
            warn!("Could not record the failure of task {}: {}", task_id, e);
        }

        let failed = StatusChange::new(DetailedStatus::Running, LifecycleEvent::Fail)
            .map(|change| change.with_error(&message))
            .and_then(|change| {
                self.contexts
                    .settle(task_id, context, || self.transition(task_id, &change))
            });
        match failed {
            Ok(task) => self.record_milestone(&task),
            Err(e) => warn!("Task {} could not be marked failed: {}", task_id, e),
        }
    }

    /// Adds the milestone `task` just reached to its execution log
    ///
    /// The status change has already happened, so a storage error here is
    /// only logged.
    pub(super) fn record_milestone(&self, task: &Task) {
        let Some(new) = NewExecutionRecord::for_task(task) else {
            return;
        };
        if let Err(e) = self.repository.append_execution_record(&new) {
            warn!(
                "Could not record {} for task {}: {}",
                new.action, task.id, e
            );
        }
    }

    /// Reads the run milestones of a task
    pub fn execution_log(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
        self.repository.get_task(task_id)?;
        self.repository.list_execution_records(task_id)
    }
}
