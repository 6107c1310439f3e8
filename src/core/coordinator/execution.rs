use super::registry::ExecutionContext;
use super::ExecutionCoordinator;
use crate::agents::AgentStep;
use crate::core::{
    ApprovalStatus, Continuation, DetailedStatus, Interaction, InteractionBody, InteractionKind,
    LifecycleEvent, NewInteraction, PendingStep, StatusChange, Task, ToolApprovalRequest, Turn,
};
use crate::errors::Error;
use crate::event::EventKind;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the loop does after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StepFlow {
    Continue,
    Stop,
}

/// An approved tool call that runs before the agent is asked again
#[derive(Debug, Clone)]
pub(super) struct ApprovedCall {
    pub tool: String,
    pub args: Value,
}

impl ExecutionCoordinator {
    /// Starts the agent loop of a `pending` or `failed` task
    ///
    /// Returns as soon as the task is `running`; the loop itself runs in the
    /// background and its progress is observed through the task status and
    /// the interaction log.
    ///
    /// # Errors
    ///
    /// * `Error::AlreadyRunning` if a loop already drives the task or it is
    ///   parked at a suspension point
    /// * `Error::InvalidTransition` if the task is completed or cancelled
    pub async fn execute(&self, task_id: &str) -> Result<Task, Error> {
        let context = self.contexts.claim(task_id)?;

        // Leaving pending or failed needs a claim, so this read holds until the CAS
        let started = self.repository.get_task(task_id).and_then(|task| {
            if task.detailed_status.is_active() {
                return Err(Error::AlreadyRunning(task_id.to_string()));
            }
            let change = StatusChange::new(task.detailed_status, LifecycleEvent::Execute)?;
            self.transition(task_id, &change)
        });
        let task = match started {
            Ok(task) => task,
            Err(e) => {
                self.contexts.release(task_id, &context);
                return Err(e);
            }
        };

        self.record_milestone(&task);
        info!("Task {} started", task_id);
        self.resume(task_id, context);
        Ok(task)
    }

    /// Rebuilds the loop state from storage and drives it in the background
    ///
    /// The caller must own `context` and have moved the task to `running`.
    pub(super) fn resume(&self, task_id: &str, context: Arc<ExecutionContext>) {
        let coordinator = self.clone();
        let task_id = task_id.to_string();

        tokio::spawn(async move {
            let prepared = coordinator.load_or_start(&task_id).and_then(|mut continuation| {
                let approved = coordinator.take_pending(&task_id, &mut continuation)?;
                Ok((continuation, approved))
            });

            match prepared {
                Ok((continuation, approved)) => {
                    coordinator
                        .run_loop(task_id, context, continuation, approved)
                        .await
                }
                Err(e) => {
                    coordinator.abort(&task_id, &context, &e).await;
                    coordinator.contexts.release(&task_id, &context);
                }
            }
        });
    }

    fn load_or_start(&self, task_id: &str) -> Result<Continuation, Error> {
        match self.repository.load_continuation(task_id)? {
            Some(continuation) => Ok(continuation),
            None => {
                let task = self.repository.get_task(task_id)?;
                Ok(Continuation::start(&task))
            }
        }
    }

    /// Clears the suspension marker and feeds its outcome into the conversation
    ///
    /// The outcome is read back from storage (the answered question or the
    /// resolved approval), so the same path serves fresh resumes and restarts.
    fn take_pending(
        &self,
        task_id: &str,
        continuation: &mut Continuation,
    ) -> Result<Option<ApprovedCall>, Error> {
        match continuation.pending.take() {
            None => Ok(None),
            Some(PendingStep::AwaitingAnswer {
                interaction_id,
                question,
            }) => {
                let asked = self.log.get(task_id, interaction_id)?;
                if let Some(answer) = asked.response {
                    continuation.push(Turn::Answer {
                        question,
                        answer,
                        skipped: false,
                    });
                }
                Ok(None)
            }
            Some(PendingStep::AwaitingApproval {
                request_id,
                tool,
                args,
            }) => {
                let request = self.repository.get_approval(&request_id)?;
                match request.status {
                    ApprovalStatus::Approved => Ok(Some(ApprovedCall { tool, args })),
                    ApprovalStatus::Rejected => {
                        continuation.push(Turn::ToolDenied {
                            tool,
                            note: request.response_note,
                        });
                        Ok(None)
                    }
                    ApprovalStatus::Pending => {
                        warn!(
                            "Task {} resumed while approval {} is still pending",
                            task_id, request_id
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn run_loop(
        self,
        task_id: String,
        context: Arc<ExecutionContext>,
        mut continuation: Continuation,
        approved: Option<ApprovedCall>,
    ) {
        let mut keep_going = true;
        if let Some(call) = approved {
            let flow = self
                .run_tool(&task_id, &context, &mut continuation, &call.tool, &call.args)
                .await;
            keep_going = self.after_step(&task_id, &context, &continuation, flow).await;
        }

        while keep_going {
            if context.token.is_cancelled() {
                debug!("Task {} loop observed cancellation", task_id);
                break;
            }
            for text in context.drain_messages() {
                continuation.push(Turn::UserMessage { text });
            }
            let flow = self.step(&task_id, &context, &mut continuation).await;
            keep_going = self.after_step(&task_id, &context, &continuation, flow).await;
        }

        self.contexts.release(&task_id, &context);
        debug!("Task {} loop exited", task_id);
    }

    /// Persists progress after a step and reports whether the loop goes on
    async fn after_step(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &Continuation,
        flow: Result<StepFlow, Error>,
    ) -> bool {
        let flow = flow.and_then(|flow| {
            if flow == StepFlow::Continue {
                self.repository.save_continuation(task_id, continuation)?;
            }
            Ok(flow)
        });

        match flow {
            Ok(StepFlow::Continue) => true,
            Ok(StepFlow::Stop) => false,
            Err(e) => {
                self.abort(task_id, context, &e).await;
                false
            }
        }
    }

    async fn step(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &mut Continuation,
    ) -> Result<StepFlow, Error> {
        let task = self.repository.get_task(task_id)?;
        let next =
            tokio::time::timeout(self.settings.step_timeout, self.agent.next(&task, continuation))
                .await;

        // The agent call is allowed to finish; its step is dropped once cancelled
        if context.token.is_cancelled() {
            debug!("Task {} discarding agent step after cancellation", task_id);
            return Ok(StepFlow::Stop);
        }

        let step = match next {
            Ok(Ok(step)) => step,
            Ok(Err(e)) => return self.fail(task_id, context, continuation, &e.to_string()).await,
            Err(_) => {
                let message = Error::AgentStepFailure(format!(
                    "no step within {}",
                    humantime::format_duration(self.settings.step_timeout)
                ));
                return self
                    .fail(task_id, context, continuation, &message.to_string())
                    .await;
            }
        };

        continuation.steps_taken += 1;
        debug!(
            "Task {} step {}: {}",
            task_id,
            continuation.steps_taken,
            step.as_condition()
        );

        match step {
            AgentStep::Emit {
                kind: InteractionKind::Question,
                content: question,
                ..
            }
            | AgentStep::AskQuestion { question } => {
                self.ask(task_id, context, continuation, &question).await
            }
            AgentStep::Emit {
                kind,
                content,
                metadata,
            } => {
                let entry = NewInteraction::emitted(task_id, kind, &content, metadata);
                if self.append_guarded(context, entry).await?.is_none() {
                    return Ok(StepFlow::Stop);
                }
                continuation.push(Turn::Agent { kind, content });
                Ok(StepFlow::Continue)
            }
            AgentStep::CallTool { tool, args, reason } => {
                match self.check_permission(&task, &tool) {
                    Ok(()) => {
                        self.run_tool(task_id, context, continuation, &tool, &args)
                            .await
                    }
                    Err(Error::ToolNotPermitted(tool)) => {
                        self.request_approval(&task, context, continuation, tool, args, reason)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            AgentStep::Finish { result } => {
                self.complete(task_id, context, continuation, result).await
            }
            AgentStep::Fail { reason } => self.fail(task_id, context, continuation, &reason).await,
        }
    }

    /// Appends an entry unless the context has been cancelled
    pub(super) async fn append_guarded(
        &self,
        context: &ExecutionContext,
        entry: NewInteraction,
    ) -> Result<Option<Interaction>, Error> {
        let Some(_gate) = context.exclusive().await else {
            return Ok(None);
        };
        self.log.append(entry).map(Some)
    }

    fn check_permission(&self, task: &Task, tool: &str) -> Result<(), Error> {
        if self.tools.is_allowed(task, tool) {
            Ok(())
        } else {
            Err(Error::ToolNotPermitted(tool.to_string()))
        }
    }

    /// Invokes a permitted tool and records the call and its outcome
    ///
    /// Cancellation abandons the invocation; no result is recorded for it.
    async fn run_tool(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &mut Continuation,
        tool: &str,
        args: &Value,
    ) -> Result<StepFlow, Error> {
        let call = NewInteraction::new(
            task_id,
            InteractionBody::ToolCall {
                tool: tool.to_string(),
                args: args.clone(),
            },
        );
        if self.append_guarded(context, call).await?.is_none() {
            return Ok(StepFlow::Stop);
        }
        continuation.push(Turn::ToolCall {
            tool: tool.to_string(),
            args: args.clone(),
        });

        debug!("Task {} invoking tool {}", task_id, tool);
        let outcome = tokio::select! {
            biased;
            _ = context.token.cancelled() => {
                info!("Task {} abandoned tool '{}' on cancellation", task_id, tool);
                return Ok(StepFlow::Stop);
            }
            outcome = tokio::time::timeout(self.settings.tool_timeout, self.tools.invoke(tool, args)) => {
                outcome.unwrap_or_else(|_| {
                    Err(format!(
                        "Tool '{}' timed out after {}",
                        tool,
                        humantime::format_duration(self.settings.tool_timeout)
                    ))
                })
            }
        };

        let (output, is_error) = match outcome {
            Ok(output) => (output, false),
            Err(message) => {
                warn!("Task {} tool '{}' failed: {}", task_id, tool, message);
                (message, true)
            }
        };

        let result = NewInteraction::new(
            task_id,
            InteractionBody::ToolResult {
                tool: tool.to_string(),
                output: output.clone(),
                is_error,
            },
        );
        if self.append_guarded(context, result).await?.is_none() {
            return Ok(StepFlow::Stop);
        }
        continuation.push(Turn::ToolResult {
            tool: tool.to_string(),
            output,
            is_error,
        });
        Ok(StepFlow::Continue)
    }

    /// Handles a question: skipped in auto mode, otherwise the loop parks
    async fn ask(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &mut Continuation,
        question: &str,
    ) -> Result<StepFlow, Error> {
        let Some(_gate) = context.exclusive().await else {
            return Ok(StepFlow::Stop);
        };

        // Read at the suspension point so a toggle made while the agent was
        // thinking is honoured
        let task = self.repository.get_task(task_id)?;
        continuation.push(Turn::Question {
            question: question.to_string(),
        });

        if task.auto_mode {
            self.log.append(NewInteraction::new(
                task_id,
                InteractionBody::Info {
                    text: format!("Question skipped in auto mode: {}", question),
                    metadata: json!({ "skipped_question": question, "reason": "auto_mode" }),
                },
            ))?;
            continuation.push(Turn::Answer {
                question: question.to_string(),
                answer: self.settings.auto_answer_for(question),
                skipped: true,
            });
            info!("Task {} skipped a question in auto mode", task_id);
            return Ok(StepFlow::Continue);
        }

        let posted = self.log.append(NewInteraction::new(
            task_id,
            InteractionBody::Question {
                text: question.to_string(),
            },
        ))?;
        continuation.pending = Some(PendingStep::AwaitingAnswer {
            interaction_id: posted.id,
            question: question.to_string(),
        });
        self.suspend(task_id, context, continuation, LifecycleEvent::AskQuestion)?;
        info!(
            "Task {} waiting for an answer to interaction #{}",
            task_id, posted.id
        );
        Ok(StepFlow::Stop)
    }

    /// Opens an approval request for a tool outside the granted set and parks
    async fn request_approval(
        &self,
        task: &Task,
        context: &Arc<ExecutionContext>,
        continuation: &mut Continuation,
        tool: String,
        args: Value,
        reason: Option<String>,
    ) -> Result<StepFlow, Error> {
        let Some(_gate) = context.exclusive().await else {
            return Ok(StepFlow::Stop);
        };

        let reason = reason.unwrap_or_else(|| format!("Agent requested tool '{}'", tool));
        let request = ToolApprovalRequest::new(
            task.assigned_to.as_deref(),
            Some(&task.id),
            vec![tool.clone()],
            &reason,
        );
        self.repository.insert_approval(&request)?;
        self.log.append(NewInteraction::new(
            &task.id,
            InteractionBody::Info {
                text: format!("Waiting for approval to use tool '{}'", tool),
                metadata: json!({
                    "request_id": request.id,
                    "tool_name": tool,
                    "reason": reason,
                }),
            },
        ))?;

        continuation.pending = Some(PendingStep::AwaitingApproval {
            request_id: request.id.clone(),
            tool: tool.clone(),
            args,
        });
        self.suspend(
            &task.id,
            context,
            continuation,
            LifecycleEvent::RequestApproval,
        )?;
        self.notifier.publish(
            &task.id,
            EventKind::ApprovalRequested {
                request_id: request.id.clone(),
            },
        );
        info!(
            "Task {} waiting for approval {} of tool '{}'",
            task.id, request.id, tool
        );
        Ok(StepFlow::Stop)
    }

    /// Persists the parked loop and leaves `running` in one critical section
    /// with the release of its context
    fn suspend(
        &self,
        task_id: &str,
        context: &Arc<ExecutionContext>,
        continuation: &mut Continuation,
        event: LifecycleEvent,
    ) -> Result<Task, Error> {
        let change = StatusChange::new(DetailedStatus::Running, event)?;
        self.contexts.settle(task_id, context, || {
            for text in context.drain_messages() {
                continuation.push(Turn::UserMessage { text });
            }
            self.repository.save_continuation(task_id, continuation)?;
            self.transition(task_id, &change)
        })
    }
}
