use super::Repository;
use crate::core::{
    response_conflict, ApprovalStatus, Continuation, ExecutionRecord, Interaction,
    InteractionQuery, NewExecutionRecord, NewInteraction, StatusChange, Task, TaskFilter,
    ToolApprovalRequest,
};
use crate::errors::Error;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

struct StoredTask {
    task: Task,
    continuation: Option<Continuation>,
    interactions: Vec<Interaction>,
    executions: Vec<ExecutionRecord>,
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, StoredTask>,
    approvals: HashMap<String, ToolApprovalRequest>,
}

/// Non-persistent repository used for tests and `storage.kind: memory`
///
/// A single lock guards all state, which makes every method trivially atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::RepositoryUnavailable("in-memory store lock poisoned".into()))
    }
}

impl MemoryState {
    fn entry(&mut self, task_id: &str) -> Result<&mut StoredTask, Error> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, Error> {
        Ok(&mut self.entry(task_id)?.task)
    }
}

impl Repository for InMemoryRepository {
    fn insert_task(&self, task: &Task) -> Result<(), Error> {
        let mut state = self.lock()?;
        state.tasks.insert(
            task.id.clone(),
            StoredTask {
                task: task.clone(),
                continuation: None,
                interactions: Vec::new(),
                executions: Vec::new(),
            },
        );
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> Result<Task, Error> {
        let mut state = self.lock()?;
        Ok(state.task_mut(task_id)?.clone())
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, Error> {
        let state = self.lock()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .map(|stored| &stored.task)
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    fn delete_task(&self, task_id: &str) -> Result<(), Error> {
        let mut state = self.lock()?;
        let status = state.task_mut(task_id)?.detailed_status;
        if status.is_active() {
            return Err(Error::invalid_transition(status, "delete"));
        }
        state.tasks.remove(task_id);
        Ok(())
    }

    fn transition_status(&self, task_id: &str, change: &StatusChange) -> Result<Task, Error> {
        let mut state = self.lock()?;
        let task = state.task_mut(task_id)?;
        if task.detailed_status != change.expected {
            return Err(Error::invalid_transition(task.detailed_status, change.event));
        }
        change.apply_to(task);
        Ok(task.clone())
    }

    fn toggle_auto_mode(&self, task_id: &str) -> Result<Task, Error> {
        let mut state = self.lock()?;
        let task = state.task_mut(task_id)?;
        task.auto_mode = !task.auto_mode;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    fn grant_tools(&self, task_id: &str, tools: &[String]) -> Result<Task, Error> {
        let mut state = self.lock()?;
        let task = state.task_mut(task_id)?;
        for tool in tools {
            if !task.additional_tool_names.contains(tool) {
                task.additional_tool_names.push(tool.clone());
            }
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    fn save_continuation(&self, task_id: &str, continuation: &Continuation) -> Result<(), Error> {
        let mut state = self.lock()?;
        state.entry(task_id)?.continuation = Some(continuation.clone());
        Ok(())
    }

    fn load_continuation(&self, task_id: &str) -> Result<Option<Continuation>, Error> {
        let mut state = self.lock()?;
        Ok(state.entry(task_id)?.continuation.clone())
    }

    fn append_interaction(&self, new: &NewInteraction) -> Result<Interaction, Error> {
        let mut state = self.lock()?;
        let stored = state.entry(&new.task_id)?;
        let id = stored.interactions.last().map_or(0, |last| last.id) + 1;
        let interaction = Interaction {
            task_id: new.task_id.clone(),
            id,
            interaction_type: new.interaction_type,
            content: new.content.clone(),
            metadata: new.metadata.clone(),
            requires_response: new.requires_response,
            response: None,
            created_at: Utc::now(),
            responded_at: None,
        };
        stored.interactions.push(interaction.clone());
        Ok(interaction)
    }

    fn list_interactions(
        &self,
        task_id: &str,
        query: &InteractionQuery,
    ) -> Result<Vec<Interaction>, Error> {
        let state = self.lock()?;
        let Some(stored) = state.tasks.get(task_id) else {
            return Ok(Vec::new());
        };
        Ok(stored
            .interactions
            .iter()
            .filter(|interaction| query.matches(interaction))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn get_interaction(&self, task_id: &str, interaction_id: i64) -> Result<Interaction, Error> {
        let state = self.lock()?;
        state
            .tasks
            .get(task_id)
            .and_then(|stored| stored.interactions.iter().find(|i| i.id == interaction_id))
            .cloned()
            .ok_or_else(|| Error::InteractionNotFound(task_id.to_string(), interaction_id))
    }

    fn respond_to_question(
        &self,
        task_id: &str,
        interaction_id: i64,
        response: &str,
    ) -> Result<Interaction, Error> {
        let mut state = self.lock()?;
        let interaction = state
            .tasks
            .get_mut(task_id)
            .and_then(|stored| {
                stored
                    .interactions
                    .iter_mut()
                    .find(|i| i.id == interaction_id)
            })
            .ok_or_else(|| Error::InteractionNotFound(task_id.to_string(), interaction_id))?;

        if !interaction.is_pending_question() {
            return Err(response_conflict(interaction));
        }
        interaction.response = Some(response.to_string());
        interaction.responded_at = Some(Utc::now());
        Ok(interaction.clone())
    }

    fn insert_approval(&self, request: &ToolApprovalRequest) -> Result<(), Error> {
        let mut state = self.lock()?;
        state
            .approvals
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn get_approval(&self, request_id: &str) -> Result<ToolApprovalRequest, Error> {
        let state = self.lock()?;
        state
            .approvals
            .get(request_id)
            .cloned()
            .ok_or_else(|| Error::ApprovalNotFound(request_id.to_string()))
    }

    fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        task_id: Option<&str>,
    ) -> Result<Vec<ToolApprovalRequest>, Error> {
        let state = self.lock()?;
        let mut requests: Vec<ToolApprovalRequest> = state
            .approvals
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| task_id.map_or(true, |t| r.task_id.as_deref() == Some(t)))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }

    fn resolve_approval(
        &self,
        request_id: &str,
        approved: bool,
        note: Option<&str>,
    ) -> Result<ToolApprovalRequest, Error> {
        let mut state = self.lock()?;
        let request = state
            .approvals
            .get_mut(request_id)
            .ok_or_else(|| Error::ApprovalNotFound(request_id.to_string()))?;
        if !request.is_pending() {
            return Err(Error::ApprovalAlreadyResolved(request_id.to_string()));
        }
        request.status = ApprovalStatus::from_decision(approved);
        request.responded_at = Some(Utc::now());
        request.response_note = note.map(str::to_string);
        Ok(request.clone())
    }

    fn append_execution_record(&self, new: &NewExecutionRecord) -> Result<ExecutionRecord, Error> {
        let mut state = self.lock()?;
        let stored = state.entry(&new.task_id)?;
        let id = stored.executions.last().map_or(0, |last| last.id) + 1;
        let record = new.clone().into_record(id, Utc::now());
        stored.executions.push(record.clone());
        Ok(record)
    }

    fn list_execution_records(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
        let state = self.lock()?;
        Ok(state
            .tasks
            .get(task_id)
            .map(|stored| stored.executions.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DetailedStatus, InteractionBody, LifecycleEvent, NewTask};

    #[test]
    fn test_memory_store_mirrors_question_rules() {
        let repo = InMemoryRepository::new();
        let task = NewTask::new("Draft a changelog").into_task();
        repo.insert_task(&task).unwrap();

        let question = repo
            .append_interaction(&NewInteraction::new(
                &task.id,
                InteractionBody::Question {
                    text: "Which version?".into(),
                },
            ))
            .unwrap();
        assert_eq!(question.id, 1);

        repo.respond_to_question(&task.id, question.id, "1.2.0")
            .unwrap();
        assert!(matches!(
            repo.respond_to_question(&task.id, question.id, "1.3.0"),
            Err(Error::AlreadyResponded(1))
        ));
        assert!(repo
            .list_interactions(&task.id, &InteractionQuery::pending())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_memory_store_rejects_stale_transition() {
        let repo = InMemoryRepository::new();
        let task = NewTask::new("Draft a changelog").into_task();
        repo.insert_task(&task).unwrap();

        let cancel = StatusChange::new(DetailedStatus::Running, LifecycleEvent::Cancel).unwrap();
        assert!(matches!(
            repo.transition_status(&task.id, &cancel),
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(
            repo.get_task(&task.id).unwrap().detailed_status,
            DetailedStatus::Pending
        );
    }

    #[test]
    fn test_limit_applies_after_filters() {
        let repo = InMemoryRepository::new();
        let task = NewTask::new("x").into_task();
        repo.insert_task(&task).unwrap();
        for n in 0..5 {
            repo.append_interaction(&NewInteraction::info(&task.id, &n.to_string()))
                .unwrap();
        }

        let query = InteractionQuery {
            since: Some(2),
            limit: Some(2),
            ..Default::default()
        };
        let ids: Vec<i64> = repo
            .list_interactions(&task.id, &query)
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
