use super::registry::ExecutionContext;
use super::ExecutionCoordinator;
use crate::core::{
    response_conflict, ApprovalStatus, Continuation, DetailedStatus, Interaction,
    InteractionBody, LifecycleEvent, NewInteraction, PendingStep, StatusChange, Task, TaskFilter,
    TaskStatus, ToolApprovalRequest, Turn,
};
use crate::errors::Error;
use crate::event::EventKind;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts to route a message while the task changes hands
const ROUTING_ATTEMPTS: usize = 3;

impl ExecutionCoordinator {
    /// Answers the pending question of a `waiting_input` task and resumes it
    ///
    /// # Returns
    ///
    /// The question with its response attached
    ///
    /// # Errors
    ///
    /// * `Error::AlreadyResponded` / `Error::NotAQuestion` for stale or
    ///   duplicate submissions; the log is left untouched
    /// * `Error::InvalidTransition` if the task is not waiting for input
    pub async fn submit_response(
        &self,
        task_id: &str,
        interaction_id: i64,
        text: &str,
    ) -> Result<Interaction, Error> {
        let (answered, _) = self.answer_question(task_id, interaction_id, text).await?;
        Ok(answered)
    }

    async fn answer_question(
        &self,
        task_id: &str,
        interaction_id: i64,
        text: &str,
    ) -> Result<(Interaction, Option<Interaction>), Error> {
        let question = self.log.get(task_id, interaction_id)?;
        if !question.is_pending_question() {
            return Err(response_conflict(&question));
        }
        let task = self.repository.get_task(task_id)?;
        if task.detailed_status != DetailedStatus::WaitingInput {
            return Err(Error::invalid_transition(
                task.detailed_status,
                LifecycleEvent::Respond,
            ));
        }

        let context = match self.contexts.claim(task_id) {
            Ok(context) => context,
            Err(e) => {
                // The winner of a double submission may still hold the claim
                let question = self.log.get(task_id, interaction_id)?;
                return Err(if question.is_pending_question() {
                    e
                } else {
                    response_conflict(&question)
                });
            }
        };

        // Single assignment on the question decides between racing submissions
        let answered = self
            .reenter(
                task_id,
                &context,
                DetailedStatus::WaitingInput,
                LifecycleEvent::Respond,
                || self.log.respond(task_id, interaction_id, text),
            )
            .await;
        let answered = match answered {
            Ok(answered) => answered,
            Err(e) => {
                self.contexts.release(task_id, &context);
                return Err(e);
            }
        };

        let echoed = self.resume_answered(task_id, context, &question, text).await?;
        Ok((answered, echoed))
    }

    /// Records a human decision on a parked task and moves it back to `running`
    ///
    /// The caller must own `context`. Everything happens under its write
    /// gate: a cancel that got there first leaves the decision unrecorded,
    /// and one that comes later finds the task running.
    async fn reenter<T>(
        &self,
        task_id: &str,
        context: &ExecutionContext,
        parked: DetailedStatus,
        event: LifecycleEvent,
        record: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, Error> {
        let Some(_gate) = context.exclusive().await else {
            return Err(Error::invalid_transition(DetailedStatus::Cancelled, event));
        };

        let task = self.repository.get_task(task_id)?;
        if task.detailed_status != parked {
            return Err(Error::invalid_transition(task.detailed_status, event));
        }
        let recorded = record()?;
        let change = StatusChange::new(parked, event)?;
        self.transition(task_id, &change)?;
        Ok(recorded)
    }

    /// Echoes an answer into the log and restarts the loop of the claimed task
    async fn resume_answered(
        &self,
        task_id: &str,
        context: Arc<ExecutionContext>,
        question: &Interaction,
        text: &str,
    ) -> Result<Option<Interaction>, Error> {
        let echo = NewInteraction::new(
            task_id,
            InteractionBody::UserResponse {
                text: text.to_string(),
                question_id: Some(question.id),
                question: Some(question.content.clone()),
            },
        );
        match self.append_guarded(&context, echo).await {
            Ok(echoed) => {
                info!(
                    "Task {} resumed with the answer to interaction #{}",
                    task_id, question.id
                );
                self.resume(task_id, context);
                Ok(echoed)
            }
            Err(e) => {
                self.abort(task_id, &context, &e).await;
                self.contexts.release(task_id, &context);
                Err(e)
            }
        }
    }

    /// Approves or rejects a pending tool request and resumes its task
    ///
    /// Approval grants the requested tools to the task and runs the call that
    /// triggered the request. Rejection records why and tells the agent the
    /// tool was denied; the agent may still finish without it.
    ///
    /// # Errors
    ///
    /// * `Error::ApprovalAlreadyResolved` if the request is no longer pending
    /// * `Error::InvalidTransition` if its task is not waiting for approval
    pub async fn resolve_approval(
        &self,
        request_id: &str,
        approved: bool,
        note: Option<&str>,
    ) -> Result<ToolApprovalRequest, Error> {
        let request = self.repository.get_approval(request_id)?;
        if !request.is_pending() {
            return Err(Error::ApprovalAlreadyResolved(request_id.to_string()));
        }
        let event = if approved {
            LifecycleEvent::Approve
        } else {
            LifecycleEvent::Reject
        };

        let Some(task_id) = request.task_id.clone() else {
            // Agent-level request with no loop to resume
            let resolved = self.repository.resolve_approval(request_id, approved, note)?;
            info!("Approval {} resolved as {}", request_id, resolved.status);
            return Ok(resolved);
        };

        let task = self.repository.get_task(&task_id)?;
        if task.detailed_status != DetailedStatus::WaitingApproval {
            return Err(Error::invalid_transition(task.detailed_status, event));
        }

        let context = match self.contexts.claim(&task_id) {
            Ok(context) => context,
            Err(e) => {
                let request = self.repository.get_approval(request_id)?;
                return Err(if request.is_pending() {
                    e
                } else {
                    Error::ApprovalAlreadyResolved(request_id.to_string())
                });
            }
        };

        let resolved = self
            .reenter(
                &task_id,
                &context,
                DetailedStatus::WaitingApproval,
                event,
                || self.repository.resolve_approval(request_id, approved, note),
            )
            .await;
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                self.contexts.release(&task_id, &context);
                return Err(e);
            }
        };
        self.notifier.publish(
            &task_id,
            EventKind::ApprovalResolved {
                request_id: request_id.to_string(),
                approved,
            },
        );

        self.resume_resolved(&task_id, context, &resolved).await?;
        Ok(resolved)
    }

    /// Applies a resolved approval to the claimed task and restarts its loop
    async fn resume_resolved(
        &self,
        task_id: &str,
        context: Arc<ExecutionContext>,
        request: &ToolApprovalRequest,
    ) -> Result<(), Error> {
        let recorded = if request.status == ApprovalStatus::Approved {
            self.repository
                .grant_tools(task_id, &request.requested_tools)
                .map(|_| ())
        } else {
            let denial = NewInteraction::new(
                task_id,
                InteractionBody::Info {
                    text: format!(
                        "Tool '{}' was not approved",
                        request.requested_tools.join(", ")
                    ),
                    metadata: json!({ "request_id": request.id, "note": request.response_note }),
                },
            );
            self.append_guarded(&context, denial).await.map(|_| ())
        };
        if let Err(e) = recorded {
            self.abort(task_id, &context, &e).await;
            self.contexts.release(task_id, &context);
            return Err(e);
        }

        info!(
            "Task {} resumed after approval {} was {}",
            task_id, request.id, request.status
        );
        self.resume(task_id, context);
        Ok(())
    }

    /// Delivers a free-form user message to a task
    ///
    /// A message sent while a question is pending answers that question. A
    /// running loop receives it before its next step, a parked or idle task
    /// finds it in its conversation when it resumes, and a completed task
    /// only logs it.
    ///
    /// # Returns
    ///
    /// The `user_response` interaction recording the message
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` for cancelled tasks
    pub async fn send_message(&self, task_id: &str, text: &str) -> Result<Interaction, Error> {
        for attempt in 1..=ROUTING_ATTEMPTS {
            let task = self.repository.get_task(task_id)?;
            if task.detailed_status == DetailedStatus::WaitingInput {
                if let Some(question) = self.log.pending_question(task_id)? {
                    let (answered, echoed) =
                        self.answer_question(task_id, question.id, text).await?;
                    return Ok(echoed.unwrap_or(answered));
                }
            }

            if let Some(context) = self.contexts.get(task_id) {
                let Some(_gate) = context.exclusive().await else {
                    return Err(Error::invalid_transition(
                        DetailedStatus::Cancelled,
                        "send_message",
                    ));
                };
                let still_active = self
                    .contexts
                    .get(task_id)
                    .is_some_and(|current| Arc::ptr_eq(&current, &context));
                if still_active {
                    let echo = self.log.append(Self::message_entry(task_id, text))?;
                    context.push_message(text);
                    debug!("Task {} queued a message for its running loop", task_id);
                    return Ok(echo);
                }
                debug!("Task {} parked while routing a message ({})", task_id, attempt);
                continue;
            }

            let routed = self.contexts.with_context(
                task_id,
                |_| None,
                || Some(self.record_idle_message(task_id, text)),
            );
            match routed {
                Some(result) => return result,
                None => debug!("Task {} started while routing a message ({})", task_id, attempt),
            }
        }

        Err(Error::AlreadyRunning(task_id.to_string()))
    }

    fn message_entry(task_id: &str, text: &str) -> NewInteraction {
        NewInteraction::new(
            task_id,
            InteractionBody::UserResponse {
                text: text.to_string(),
                question_id: None,
                question: None,
            },
        )
    }

    /// Logs a message for a task without a loop and keeps it for the next run
    fn record_idle_message(&self, task_id: &str, text: &str) -> Result<Interaction, Error> {
        let task = self.repository.get_task(task_id)?;
        match task.detailed_status {
            DetailedStatus::Cancelled => Err(Error::invalid_transition(
                task.detailed_status,
                "send_message",
            )),
            DetailedStatus::Completed => self.log.append(Self::message_entry(task_id, text)),
            _ => {
                let echo = self.log.append(Self::message_entry(task_id, text))?;
                let mut continuation = match self.repository.load_continuation(task_id)? {
                    Some(continuation) => continuation,
                    None => Continuation::start(&task),
                };
                continuation.push(Turn::UserMessage {
                    text: text.to_string(),
                });
                self.repository.save_continuation(task_id, &continuation)?;
                Ok(echo)
            }
        }
    }

    /// Restarts the loops of tasks that have no context but should be moving
    ///
    /// This covers tasks left `running` by a previous process, and parked
    /// tasks whose answer or approval was recorded but whose loop never
    /// restarted. Parked tasks still waiting on a human stay parked. A step
    /// interrupted between its log write and the continuation save is
    /// replayed.
    ///
    /// # Returns
    ///
    /// The number of loops restarted
    pub async fn recover(&self) -> Result<usize, Error> {
        let filter = TaskFilter {
            status: Some(TaskStatus::Running),
            ..Default::default()
        };

        let mut resumed = 0;
        for task in self.repository.list_tasks(&filter)? {
            let restarted = match task.detailed_status {
                DetailedStatus::Running => match self.contexts.claim(&task.id) {
                    Ok(context) => {
                        self.resume(&task.id, context);
                        Ok(true)
                    }
                    Err(_) => Ok(false),
                },
                _ => self.recover_decided(&task).await,
            };
            match restarted {
                Ok(true) => {
                    info!("Recovered task {} from {}", task.id, task.detailed_status);
                    resumed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Task {} could not be recovered: {}", task.id, e),
            }
        }
        Ok(resumed)
    }

    /// Resumes a parked task whose suspension has already been settled
    async fn recover_decided(&self, task: &Task) -> Result<bool, Error> {
        let Some(continuation) = self.repository.load_continuation(&task.id)? else {
            return Ok(false);
        };
        let decision = match (task.detailed_status, continuation.pending) {
            (
                DetailedStatus::WaitingInput,
                Some(PendingStep::AwaitingAnswer { interaction_id, .. }),
            ) => {
                let question = self.log.get(&task.id, interaction_id)?;
                match question.response.clone() {
                    Some(answer) => Decision::Answered { question, answer },
                    None => return Ok(false),
                }
            }
            (
                DetailedStatus::WaitingApproval,
                Some(PendingStep::AwaitingApproval { request_id, .. }),
            ) => {
                let request = self.repository.get_approval(&request_id)?;
                if request.is_pending() {
                    return Ok(false);
                }
                Decision::Resolved(request)
            }
            _ => return Ok(false),
        };

        let Ok(context) = self.contexts.claim(&task.id) else {
            return Ok(false);
        };
        let (parked, event) = match &decision {
            Decision::Answered { .. } => (DetailedStatus::WaitingInput, LifecycleEvent::Respond),
            Decision::Resolved(request) if request.status == ApprovalStatus::Approved => {
                (DetailedStatus::WaitingApproval, LifecycleEvent::Approve)
            }
            Decision::Resolved(_) => (DetailedStatus::WaitingApproval, LifecycleEvent::Reject),
        };
        if let Err(e) = self
            .reenter(&task.id, &context, parked, event, || Ok(()))
            .await
        {
            self.contexts.release(&task.id, &context);
            return Err(e);
        }

        match decision {
            Decision::Answered { question, answer } => {
                self.resume_answered(&task.id, context, &question, &answer)
                    .await?;
            }
            Decision::Resolved(request) => {
                self.resume_resolved(&task.id, context, &request).await?;
            }
        }
        Ok(true)
    }
}

/// Settled outcome of a suspension found during recovery
enum Decision {
    Answered { question: Interaction, answer: String },
    Resolved(ToolApprovalRequest),
}
