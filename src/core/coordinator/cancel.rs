use super::registry::ExecutionContext;
use super::ExecutionCoordinator;
use crate::constants::CANCELLED_MESSAGE;
use crate::core::{DetailedStatus, LifecycleEvent, NewInteraction, StatusChange, Task};
use crate::errors::Error;
use std::sync::Arc;
use tracing::{debug, info};

/// Attempts before giving up on a task whose status keeps moving
const CANCEL_ATTEMPTS: usize = 3;

enum CancelAttempt {
    Done(Task),
    /// The compare-and-set lost against this status
    Moved(DetailedStatus),
}

impl ExecutionCoordinator {
    /// Cancels a running or waiting task
    ///
    /// A running loop is signalled and stops at its next safe point: an agent
    /// call in flight completes and its step is dropped, a tool call in flight
    /// is abandoned. The cancellation record is the last interaction the task
    /// ever gets. Cancelling a cancelled task is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` for pending, completed and failed tasks
    pub async fn cancel(&self, task_id: &str) -> Result<Task, Error> {
        let mut last_seen = DetailedStatus::Running;

        for attempt in 1..=CANCEL_ATTEMPTS {
            // A parked task has no loop; holding a claim keeps answers and
            // approvals from resuming it underneath us
            let (context, claimed) = match self.contexts.get(task_id) {
                Some(context) => (context, false),
                None => match self.contexts.claim(task_id) {
                    Ok(context) => (context, true),
                    Err(_) => {
                        debug!("Task {} was claimed during cancel attempt {}", task_id, attempt);
                        continue;
                    }
                },
            };

            let outcome = self.cancel_with(task_id, &context).await;
            if claimed {
                self.contexts.release(task_id, &context);
            }
            match outcome {
                Ok(CancelAttempt::Done(task)) => return Ok(task),
                Ok(CancelAttempt::Moved(moved_to)) => {
                    debug!(
                        "Task {} moved to {} during cancel attempt {}",
                        task_id, moved_to, attempt
                    );
                    last_seen = moved_to;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::invalid_transition(last_seen, LifecycleEvent::Cancel))
    }

    /// One cancel attempt under the write gate of `context`
    async fn cancel_with(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
    ) -> Result<CancelAttempt, Error> {
        context.token.cancel();
        let _gate = context.lock_gate().await;

        let task = self.repository.get_task(task_id)?;
        if task.detailed_status == DetailedStatus::Cancelled {
            return Ok(CancelAttempt::Done(task));
        }

        let change = StatusChange::new(task.detailed_status, LifecycleEvent::Cancel)?
            .with_error(CANCELLED_MESSAGE);
        match self.transition(task_id, &change) {
            Ok(task) => {
                self.log.append(NewInteraction::info(task_id, CANCELLED_MESSAGE))?;
                self.record_milestone(&task);
                info!("Task {} cancelled", task_id);
                Ok(CancelAttempt::Done(task))
            }
            Err(Error::InvalidTransition { .. }) => {
                let current = self.repository.get_task(task_id)?;
                Ok(CancelAttempt::Moved(current.detailed_status))
            }
            Err(e) => Err(e),
        }
    }
}
