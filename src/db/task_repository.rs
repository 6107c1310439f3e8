use super::models::{format_time, ApprovalRow, ExecutionRow, InteractionRow, TaskRow};
use super::{Database, Repository};
use crate::core::{
    response_conflict, ApprovalStatus, Continuation, DetailedStatus, ExecutionRecord,
    Interaction, InteractionQuery, NewExecutionRecord, NewInteraction, StatusChange, Task,
    TaskFilter, ToolApprovalRequest,
};
use crate::errors::Error;
use chrono::Utc;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// SQLite-backed repository for tasks, interactions and approval requests
///
/// Writes that read before they write run inside `BEGIN IMMEDIATE`
/// transactions so that the read and the write see the same snapshot across
/// pooled connections.
#[derive(Clone, Debug)]
pub struct SqliteRepository {
    database: Database,
}

impl SqliteRepository {
    /// Creates a new SqliteRepository instance
    ///
    /// # Arguments
    ///
    /// * `database` - Connection pool with the schema already applied
    pub fn new(database: Database) -> Self {
        SqliteRepository { database }
    }
}

fn load_task(conn: &mut SqliteConnection, task_id: &str) -> Result<Task, Error> {
    use crate::schema::tasks;

    let row = tasks::table
        .find(task_id)
        .select(TaskRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
    Task::try_from(row)
}

fn load_interaction(
    conn: &mut SqliteConnection,
    task_id: &str,
    interaction_id: i64,
) -> Result<Interaction, Error> {
    use crate::schema::task_interactions as ti;

    let row = ti::table
        .filter(ti::task_id.eq(task_id))
        .filter(ti::id.eq(interaction_id))
        .select(InteractionRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| Error::InteractionNotFound(task_id.to_string(), interaction_id))?;
    Interaction::try_from(row)
}

fn load_approval(conn: &mut SqliteConnection, request_id: &str) -> Result<ToolApprovalRequest, Error> {
    use crate::schema::tool_approval_requests as ap;

    let row = ap::table
        .find(request_id)
        .select(ApprovalRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| Error::ApprovalNotFound(request_id.to_string()))?;
    ToolApprovalRequest::try_from(row)
}

impl Repository for SqliteRepository {
    fn insert_task(&self, task: &Task) -> Result<(), Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        let row = TaskRow::from_task(task)?;
        diesel::insert_into(tasks::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> Result<Task, Error> {
        let mut conn = self.database.get_conn()?;
        load_task(&mut conn, task_id)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        let mut query = tasks::table
            .select(TaskRow::as_select())
            .order(tasks::created_at.desc())
            .into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(tasks::status.eq(status.to_string()));
        }
        if let Some(detailed) = filter.detailed_status {
            query = query.filter(tasks::detailed_status.eq(detailed.to_string()));
        }
        if let Some(agent_id) = &filter.agent_id {
            query = query.filter(tasks::assigned_to.eq(agent_id.clone()));
        }

        query
            .load(&mut conn)?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    fn delete_task(&self, task_id: &str) -> Result<(), Error> {
        use crate::schema::{execution_logs, task_interactions, tasks};

        let inactive: Vec<String> = DetailedStatus::ALL
            .iter()
            .filter(|s| !s.is_active())
            .map(|s| s.to_string())
            .collect();

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let deleted = diesel::delete(
                tasks::table
                    .filter(tasks::id.eq(task_id))
                    .filter(tasks::detailed_status.eq_any(inactive)),
            )
            .execute(conn)?;

            if deleted == 0 {
                let task = load_task(conn, task_id)?;
                return Err(Error::invalid_transition(task.detailed_status, "delete"));
            }

            diesel::delete(task_interactions::table.filter(task_interactions::task_id.eq(task_id)))
                .execute(conn)?;
            diesel::delete(execution_logs::table.filter(execution_logs::task_id.eq(task_id)))
                .execute(conn)?;
            Ok(())
        })
    }

    fn transition_status(&self, task_id: &str, change: &StatusChange) -> Result<Task, Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let mut task = load_task(conn, task_id)?;
            if task.detailed_status != change.expected {
                return Err(Error::invalid_transition(task.detailed_status, change.event));
            }
            change.apply_to(&mut task);

            let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
            diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::status.eq(task.status.to_string()),
                    tasks::detailed_status.eq(task.detailed_status.to_string()),
                    tasks::result_json.eq(result_json),
                    tasks::error_message.eq(task.error_message.clone()),
                    tasks::started_at.eq(task.started_at.as_ref().map(format_time)),
                    tasks::completed_at.eq(task.completed_at.as_ref().map(format_time)),
                    tasks::updated_at.eq(format_time(&task.updated_at)),
                ))
                .execute(conn)?;
            Ok(task)
        })
    }

    fn toggle_auto_mode(&self, task_id: &str) -> Result<Task, Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let updated = diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::auto_mode.eq(diesel::dsl::not(tasks::auto_mode)),
                    tasks::updated_at.eq(format_time(&Utc::now())),
                ))
                .execute(conn)?;
            if updated == 0 {
                return Err(Error::TaskNotFound(task_id.to_string()));
            }
            load_task(conn, task_id)
        })
    }

    fn grant_tools(&self, task_id: &str, tools: &[String]) -> Result<Task, Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let mut task = load_task(conn, task_id)?;
            for tool in tools {
                if !task.additional_tool_names.contains(tool) {
                    task.additional_tool_names.push(tool.clone());
                }
            }
            task.updated_at = Utc::now();

            diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::additional_tool_names
                        .eq(serde_json::to_string(&task.additional_tool_names)?),
                    tasks::updated_at.eq(format_time(&task.updated_at)),
                ))
                .execute(conn)?;
            Ok(task)
        })
    }

    fn save_continuation(&self, task_id: &str, continuation: &Continuation) -> Result<(), Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        let stored = serde_json::to_string(continuation)?;
        let updated = diesel::update(tasks::table.find(task_id))
            .set(tasks::continuation.eq(Some(stored)))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    fn load_continuation(&self, task_id: &str) -> Result<Option<Continuation>, Error> {
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        let stored: Option<String> = tasks::table
            .find(task_id)
            .select(tasks::continuation)
            .first::<Option<String>>(&mut conn)
            .optional()?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        Ok(stored.as_deref().map(serde_json::from_str).transpose()?)
    }

    fn append_interaction(&self, new: &NewInteraction) -> Result<Interaction, Error> {
        use crate::schema::task_interactions as ti;
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let exists = tasks::table
                .find(&new.task_id)
                .select(tasks::id)
                .first::<String>(conn)
                .optional()?;
            if exists.is_none() {
                return Err(Error::TaskNotFound(new.task_id.clone()));
            }

            let last: Option<i64> = ti::table
                .filter(ti::task_id.eq(&new.task_id))
                .select(max(ti::id))
                .first(conn)?;
            let row = InteractionRow::from_new(new, last.unwrap_or(0) + 1, Utc::now())?;

            diesel::insert_into(ti::table).values(&row).execute(conn)?;
            Interaction::try_from(row)
        })
    }

    fn list_interactions(
        &self,
        task_id: &str,
        query: &InteractionQuery,
    ) -> Result<Vec<Interaction>, Error> {
        use crate::schema::task_interactions as ti;

        let mut conn = self.database.get_conn()?;
        let mut statement = ti::table
            .filter(ti::task_id.eq(task_id.to_string()))
            .select(InteractionRow::as_select())
            .order(ti::id.asc())
            .into_boxed();

        if let Some(since) = query.since {
            statement = statement.filter(ti::id.gt(since));
        }
        if let Some(kind) = query.kind {
            statement = statement.filter(ti::interaction_type.eq(kind.to_string()));
        }
        if query.pending_only {
            statement = statement
                .filter(ti::interaction_type.eq("question"))
                .filter(ti::requires_response.eq(true))
                .filter(ti::response.is_null());
        }
        if let Some(limit) = query.limit {
            statement = statement.limit(limit as i64);
        }

        statement
            .load(&mut conn)?
            .into_iter()
            .map(Interaction::try_from)
            .collect()
    }

    fn get_interaction(&self, task_id: &str, interaction_id: i64) -> Result<Interaction, Error> {
        let mut conn = self.database.get_conn()?;
        load_interaction(&mut conn, task_id, interaction_id)
    }

    fn respond_to_question(
        &self,
        task_id: &str,
        interaction_id: i64,
        response: &str,
    ) -> Result<Interaction, Error> {
        use crate::schema::task_interactions as ti;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let updated = diesel::update(
                ti::table
                    .filter(ti::task_id.eq(task_id))
                    .filter(ti::id.eq(interaction_id))
                    .filter(ti::interaction_type.eq("question"))
                    .filter(ti::requires_response.eq(true))
                    .filter(ti::response.is_null()),
            )
            .set((
                ti::response.eq(Some(response)),
                ti::responded_at.eq(Some(format_time(&Utc::now()))),
            ))
            .execute(conn)?;

            let interaction = load_interaction(conn, task_id, interaction_id)?;
            if updated == 0 {
                return Err(response_conflict(&interaction));
            }
            Ok(interaction)
        })
    }

    fn insert_approval(&self, request: &ToolApprovalRequest) -> Result<(), Error> {
        use crate::schema::tool_approval_requests as ap;

        let mut conn = self.database.get_conn()?;
        let row = ApprovalRow::from_request(request)?;
        diesel::insert_into(ap::table).values(&row).execute(&mut conn)?;
        Ok(())
    }

    fn get_approval(&self, request_id: &str) -> Result<ToolApprovalRequest, Error> {
        let mut conn = self.database.get_conn()?;
        load_approval(&mut conn, request_id)
    }

    fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        task_id: Option<&str>,
    ) -> Result<Vec<ToolApprovalRequest>, Error> {
        use crate::schema::tool_approval_requests as ap;

        let mut conn = self.database.get_conn()?;
        let mut query = ap::table
            .select(ApprovalRow::as_select())
            .order(ap::requested_at.desc())
            .into_boxed();

        if let Some(status) = status {
            query = query.filter(ap::status.eq(status.to_string()));
        }
        if let Some(task_id) = task_id {
            query = query.filter(ap::task_id.eq(task_id.to_string()));
        }

        query
            .load(&mut conn)?
            .into_iter()
            .map(ToolApprovalRequest::try_from)
            .collect()
    }

    fn resolve_approval(
        &self,
        request_id: &str,
        approved: bool,
        note: Option<&str>,
    ) -> Result<ToolApprovalRequest, Error> {
        use crate::schema::tool_approval_requests as ap;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let updated = diesel::update(
                ap::table
                    .filter(ap::id.eq(request_id))
                    .filter(ap::status.eq(ApprovalStatus::Pending.as_str())),
            )
            .set((
                ap::status.eq(ApprovalStatus::from_decision(approved).as_str()),
                ap::responded_at.eq(Some(format_time(&Utc::now()))),
                ap::response_note.eq(note),
            ))
            .execute(conn)?;

            let request = load_approval(conn, request_id)?;
            if updated == 0 {
                return Err(Error::ApprovalAlreadyResolved(request_id.to_string()));
            }
            Ok(request)
        })
    }

    fn append_execution_record(&self, new: &NewExecutionRecord) -> Result<ExecutionRecord, Error> {
        use crate::schema::execution_logs as el;
        use crate::schema::tasks;

        let mut conn = self.database.get_conn()?;
        conn.immediate_transaction(|conn| {
            let exists = tasks::table
                .find(&new.task_id)
                .select(tasks::id)
                .first::<String>(conn)
                .optional()?;
            if exists.is_none() {
                return Err(Error::TaskNotFound(new.task_id.clone()));
            }

            let last: Option<i64> = el::table
                .filter(el::task_id.eq(&new.task_id))
                .select(max(el::id))
                .first(conn)?;
            let row = ExecutionRow::from_new(new, last.unwrap_or(0) + 1, Utc::now())?;

            diesel::insert_into(el::table).values(&row).execute(conn)?;
            ExecutionRecord::try_from(row)
        })
    }

    fn list_execution_records(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
        use crate::schema::execution_logs as el;

        let mut conn = self.database.get_conn()?;
        el::table
            .filter(el::task_id.eq(task_id))
            .select(ExecutionRow::as_select())
            .order(el::id.asc())
            .load(&mut conn)?
            .into_iter()
            .map(ExecutionRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ActionStatus, ExecutionAction, InteractionBody, InteractionKind, LifecycleEvent, NewTask,
    };
    use tempfile::TempDir;

    fn repository() -> (TempDir, SqliteRepository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let database = Database::new(path.to_str().unwrap()).unwrap();
        (dir, SqliteRepository::new(database))
    }

    fn stored_task(repo: &SqliteRepository) -> Task {
        let task = NewTask::new("Collect release notes").into_task();
        repo.insert_task(&task).unwrap();
        task
    }

    #[test]
    fn test_task_round_trips_through_sqlite() {
        let (_dir, repo) = repository();
        let mut new = NewTask::new("Collect release notes");
        new.additional_tool_names = vec!["fs".into()];
        let task = new.into_task();
        repo.insert_task(&task).unwrap();

        let loaded = repo.get_task(&task.id).unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.additional_tool_names, vec!["fs".to_string()]);
        assert_eq!(loaded.detailed_status, DetailedStatus::Pending);
        assert!(matches!(
            repo.get_task("missing"),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let (_dir, repo) = repository();
        let task = stored_task(&repo);
        let start = StatusChange::new(DetailedStatus::Pending, LifecycleEvent::Execute).unwrap();

        let running = repo.transition_status(&task.id, &start).unwrap();
        assert_eq!(running.detailed_status, DetailedStatus::Running);
        assert!(running.started_at.is_some());

        match repo.transition_status(&task.id, &start) {
            Err(Error::InvalidTransition { from, .. }) => assert_eq!(from, "running"),
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_interaction_ids_are_per_task_and_gap_free() {
        let (_dir, repo) = repository();
        let first = stored_task(&repo);
        let second = stored_task(&repo);

        for _ in 0..3 {
            repo.append_interaction(&NewInteraction::info(&first.id, "step"))
                .unwrap();
        }
        let other = repo
            .append_interaction(&NewInteraction::info(&second.id, "step"))
            .unwrap();
        assert_eq!(other.id, 1);

        let ids: Vec<i64> = repo
            .list_interactions(&first.id, &InteractionQuery::default())
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let since: Vec<i64> = repo
            .list_interactions(&first.id, &InteractionQuery::since(1))
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(since, vec![2, 3]);

        assert!(matches!(
            repo.append_interaction(&NewInteraction::info("missing", "x")),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_question_accepts_a_single_response() {
        let (_dir, repo) = repository();
        let task = stored_task(&repo);
        let question = repo
            .append_interaction(&NewInteraction::new(
                &task.id,
                InteractionBody::Question {
                    text: "Which branch?".into(),
                },
            ))
            .unwrap();
        let info = repo
            .append_interaction(&NewInteraction::info(&task.id, "noted"))
            .unwrap();

        let pending = repo
            .list_interactions(&task.id, &InteractionQuery::pending())
            .unwrap();
        assert_eq!(pending.len(), 1);

        let answered = repo
            .respond_to_question(&task.id, question.id, "main")
            .unwrap();
        assert_eq!(answered.response.as_deref(), Some("main"));
        assert!(answered.responded_at.is_some());

        assert!(matches!(
            repo.respond_to_question(&task.id, question.id, "dev"),
            Err(Error::AlreadyResponded(_))
        ));
        assert!(matches!(
            repo.respond_to_question(&task.id, info.id, "dev"),
            Err(Error::NotAQuestion(_))
        ));
        assert!(matches!(
            repo.respond_to_question(&task.id, 99, "dev"),
            Err(Error::InteractionNotFound(_, 99))
        ));

        let by_kind = InteractionQuery {
            kind: Some(InteractionKind::Info),
            ..Default::default()
        };
        assert_eq!(repo.list_interactions(&task.id, &by_kind).unwrap().len(), 1);
    }

    #[test]
    fn test_approval_resolves_once() {
        let (_dir, repo) = repository();
        let task = stored_task(&repo);
        let request = ToolApprovalRequest::new(
            Some("researcher"),
            Some(&task.id),
            vec!["web_search".into()],
            "needs fresh data",
        );
        repo.insert_approval(&request).unwrap();

        let pending = repo
            .list_approvals(Some(ApprovalStatus::Pending), None)
            .unwrap();
        assert_eq!(pending.len(), 1);

        let resolved = repo
            .resolve_approval(&request.id, false, Some("not today"))
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);
        assert_eq!(resolved.response_note.as_deref(), Some("not today"));

        assert!(matches!(
            repo.resolve_approval(&request.id, true, None),
            Err(Error::ApprovalAlreadyResolved(_))
        ));
    }

    #[test]
    fn test_continuation_and_grants_persist() {
        let (_dir, repo) = repository();
        let task = stored_task(&repo);
        assert_eq!(repo.load_continuation(&task.id).unwrap(), None);

        let mut continuation = Continuation::start(&task);
        continuation.steps_taken = 4;
        repo.save_continuation(&task.id, &continuation).unwrap();
        assert_eq!(repo.load_continuation(&task.id).unwrap(), Some(continuation));

        let granted = repo
            .grant_tools(&task.id, &["fs".into(), "fs".into()])
            .unwrap();
        assert_eq!(granted.additional_tool_names, vec!["fs".to_string()]);

        let toggled = repo.toggle_auto_mode(&task.id).unwrap();
        assert!(toggled.auto_mode);
    }

    #[test]
    fn test_active_tasks_cannot_be_deleted() {
        let (_dir, repo) = repository();
        let task = stored_task(&repo);
        repo.append_interaction(&NewInteraction::info(&task.id, "hello"))
            .unwrap();
        repo.transition_status(
            &task.id,
            &StatusChange::new(DetailedStatus::Pending, LifecycleEvent::Execute).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            repo.delete_task(&task.id),
            Err(Error::InvalidTransition { .. })
        ));

        repo.transition_status(
            &task.id,
            &StatusChange::new(DetailedStatus::Running, LifecycleEvent::Cancel).unwrap(),
        )
        .unwrap();
        repo.delete_task(&task.id).unwrap();
        assert!(matches!(
            repo.get_task(&task.id),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_execution_log_records_run_milestones() {
        let (_dir, repo) = repository();
        let task = stored_task(&repo);
        let started = repo
            .transition_status(
                &task.id,
                &StatusChange::new(DetailedStatus::Pending, LifecycleEvent::Execute).unwrap(),
            )
            .unwrap();
        let failed = repo
            .transition_status(
                &task.id,
                &StatusChange::new(DetailedStatus::Running, LifecycleEvent::Fail)
                    .unwrap()
                    .with_error("tool crashed"),
            )
            .unwrap();

        for task in [&started, &failed] {
            let new = NewExecutionRecord::for_task(task).unwrap();
            repo.append_execution_record(&new).unwrap();
        }

        let records = repo.list_execution_records(&task.id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].action, ExecutionAction::TaskStarted);
        assert_eq!(records[1].id, 2);
        assert_eq!(records[1].status, ActionStatus::Failed);
        assert_eq!(records[1].error_message.as_deref(), Some("tool crashed"));
        assert!(records[1].execution_time.is_some());

        repo.delete_task(&task.id).unwrap();
        assert!(repo.list_execution_records(&task.id).unwrap().is_empty());
    }
}
