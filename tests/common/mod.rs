#![allow(dead_code)]

use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskpilot::agents::{AgentStep, ScriptedAgent};
use taskpilot::core::{
    ApprovalStatus, Continuation, CoordinatorSettings, DetailedStatus, ExecutionCoordinator,
    ExecutionRecord, Interaction, InteractionQuery, NewExecutionRecord, NewInteraction, NewTask,
    StatusChange, Task, TaskFilter, ToolApprovalRequest,
};
use taskpilot::db::{InMemoryRepository, Repository};
use taskpilot::errors::Error;
use taskpilot::event::EventBus;
use taskpilot::tools::ToolInvoker;

/// Tool invoker with a fixed set of always-allowed tools
///
/// * `echo` returns its `text` argument
/// * `slow` never finishes within a test
/// * `broken` always fails
#[derive(Default)]
pub struct TestTools {
    allowed: HashSet<String>,
}

impl TestTools {
    pub fn allowing(names: &[&str]) -> Self {
        Self {
            allowed: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl ToolInvoker for TestTools {
    fn is_allowed(&self, task: &Task, name: &str) -> bool {
        self.allowed.contains(name) || task.additional_tool_names.iter().any(|t| t == name)
    }

    async fn invoke(&self, name: &str, args: &Value) -> Result<String, String> {
        match name {
            "echo" => Ok(args["text"].as_str().unwrap_or_default().to_string()),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("finally".to_string())
            }
            "broken" => Err("disk on fire".to_string()),
            other => Err(format!("Unknown tool '{}'", other)),
        }
    }
}

/// Repository whose appends can be switched off to simulate storage loss
pub struct FlakyRepository {
    inner: InMemoryRepository,
    pub fail_appends: AtomicBool,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self {
            inner: InMemoryRepository::new(),
            fail_appends: AtomicBool::new(false),
        }
    }
}

impl Repository for FlakyRepository {
    fn insert_task(&self, task: &Task) -> Result<(), Error> {
        self.inner.insert_task(task)
    }
    fn get_task(&self, task_id: &str) -> Result<Task, Error> {
        self.inner.get_task(task_id)
    }
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, Error> {
        self.inner.list_tasks(filter)
    }
    fn delete_task(&self, task_id: &str) -> Result<(), Error> {
        self.inner.delete_task(task_id)
    }
    fn transition_status(&self, task_id: &str, change: &StatusChange) -> Result<Task, Error> {
        self.inner.transition_status(task_id, change)
    }
    fn toggle_auto_mode(&self, task_id: &str) -> Result<Task, Error> {
        self.inner.toggle_auto_mode(task_id)
    }
    fn grant_tools(&self, task_id: &str, tools: &[String]) -> Result<Task, Error> {
        self.inner.grant_tools(task_id, tools)
    }
    fn save_continuation(&self, task_id: &str, continuation: &Continuation) -> Result<(), Error> {
        self.inner.save_continuation(task_id, continuation)
    }
    fn load_continuation(&self, task_id: &str) -> Result<Option<Continuation>, Error> {
        self.inner.load_continuation(task_id)
    }
    fn append_interaction(&self, new: &NewInteraction) -> Result<Interaction, Error> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::RepositoryUnavailable("database is locked".into()));
        }
        self.inner.append_interaction(new)
    }
    fn list_interactions(
        &self,
        task_id: &str,
        query: &InteractionQuery,
    ) -> Result<Vec<Interaction>, Error> {
        self.inner.list_interactions(task_id, query)
    }
    fn get_interaction(&self, task_id: &str, interaction_id: i64) -> Result<Interaction, Error> {
        self.inner.get_interaction(task_id, interaction_id)
    }
    fn respond_to_question(
        &self,
        task_id: &str,
        interaction_id: i64,
        response: &str,
    ) -> Result<Interaction, Error> {
        self.inner
            .respond_to_question(task_id, interaction_id, response)
    }
    fn insert_approval(&self, request: &ToolApprovalRequest) -> Result<(), Error> {
        self.inner.insert_approval(request)
    }
    fn get_approval(&self, request_id: &str) -> Result<ToolApprovalRequest, Error> {
        self.inner.get_approval(request_id)
    }
    fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        task_id: Option<&str>,
    ) -> Result<Vec<ToolApprovalRequest>, Error> {
        self.inner.list_approvals(status, task_id)
    }
    fn resolve_approval(
        &self,
        request_id: &str,
        approved: bool,
        note: Option<&str>,
    ) -> Result<ToolApprovalRequest, Error> {
        self.inner.resolve_approval(request_id, approved, note)
    }
    fn append_execution_record(&self, new: &NewExecutionRecord) -> Result<ExecutionRecord, Error> {
        self.inner.append_execution_record(new)
    }
    fn list_execution_records(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
        self.inner.list_execution_records(task_id)
    }
}

pub struct Harness {
    pub coordinator: ExecutionCoordinator,
    pub repository: Arc<dyn Repository>,
    pub bus: EventBus,
}

pub fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        step_timeout: Duration::from_secs(5),
        tool_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn harness_with(
    repository: Arc<dyn Repository>,
    script: Vec<AgentStep>,
    tools: TestTools,
) -> Harness {
    let bus = EventBus::new();
    let coordinator = ExecutionCoordinator::new(
        repository.clone(),
        Arc::new(ScriptedAgent::new(script)),
        Arc::new(tools),
        Arc::new(bus.clone()),
        settings(),
    );
    Harness {
        coordinator,
        repository,
        bus,
    }
}

pub fn harness(script: Vec<AgentStep>) -> Harness {
    harness_with(
        Arc::new(InMemoryRepository::new()),
        script,
        TestTools::allowing(&["echo", "slow", "broken"]),
    )
}

impl Harness {
    pub fn create(&self, description: &str) -> Task {
        self.coordinator
            .create_task(NewTask::new(description))
            .unwrap()
    }

    pub fn log(&self, task_id: &str) -> Vec<Interaction> {
        self.coordinator.log().fetch_all(task_id).unwrap()
    }

    /// Polls until the task reaches `status` and its loop has exited
    pub async fn wait_for(&self, task_id: &str, status: DetailedStatus) -> Task {
        for _ in 0..500 {
            let task = self.coordinator.get_task(task_id).unwrap();
            if task.detailed_status == status && !self.coordinator.is_running(task_id) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let task = self.coordinator.get_task(task_id).unwrap();
        panic!(
            "task {} stuck in {} while waiting for {}",
            task_id, task.detailed_status, status
        );
    }
}

pub fn ask(question: &str) -> AgentStep {
    AgentStep::AskQuestion {
        question: question.to_string(),
    }
}

pub fn call(tool: &str, args: Value) -> AgentStep {
    AgentStep::CallTool {
        tool: tool.to_string(),
        args,
        reason: None,
    }
}

pub fn finish(result: Value) -> AgentStep {
    AgentStep::Finish { result }
}
