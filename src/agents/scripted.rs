use super::{AgentStep, AgentStepProvider};
use crate::config::AgentProfile;
use crate::core::{Continuation, Task};
use crate::errors::Error;
use std::collections::HashMap;
use tracing::debug;

/// Agent that replays a fixed list of steps
///
/// The step index is `Continuation::steps_taken`, so a loop rebuilt from
/// storage picks up exactly where it stopped.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    /// Scripts keyed by agent profile id
    scripts: HashMap<String, Vec<AgentStep>>,
    /// Script used for tasks without an assigned profile
    fallback: Vec<AgentStep>,
}

impl ScriptedAgent {
    pub fn new(fallback: Vec<AgentStep>) -> Self {
        Self {
            scripts: HashMap::new(),
            fallback,
        }
    }

    /// Builds one script per configured agent profile
    pub fn from_profiles(profiles: &[AgentProfile]) -> Self {
        let scripts = profiles
            .iter()
            .map(|p| (p.id.clone(), p.script.clone()))
            .collect();
        Self {
            scripts,
            fallback: Vec::new(),
        }
    }

    pub fn with_script(mut self, agent_id: &str, steps: Vec<AgentStep>) -> Self {
        self.scripts.insert(agent_id.to_string(), steps);
        self
    }

    fn script_for(&self, task: &Task) -> &[AgentStep] {
        task.assigned_to
            .as_deref()
            .and_then(|id| self.scripts.get(id))
            .unwrap_or(&self.fallback)
    }
}

#[async_trait::async_trait]
impl AgentStepProvider for ScriptedAgent {
    async fn next(&self, task: &Task, state: &Continuation) -> Result<AgentStep, Error> {
        let script = self.script_for(task);
        debug!(
            "Scripted step {}/{} for task {}",
            state.steps_taken + 1,
            script.len(),
            task.id
        );
        script.get(state.steps_taken).cloned().ok_or_else(|| {
            Error::AgentStepFailure(format!(
                "script exhausted after {} steps",
                state.steps_taken
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewTask;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_follows_steps_taken() {
        let agent = ScriptedAgent::new(vec![
            AgentStep::AskQuestion {
                question: "Which file?".into(),
            },
            AgentStep::Finish {
                result: json!("done"),
            },
        ]);
        let task = NewTask::new("read a file").into_task();
        let mut state = Continuation::start(&task);

        let first = agent.next(&task, &state).await.unwrap();
        assert_eq!(first.as_condition(), "ask_question");

        state.steps_taken = 1;
        let second = agent.next(&task, &state).await.unwrap();
        assert_eq!(second.as_condition(), "finish");

        state.steps_taken = 2;
        let exhausted = agent.next(&task, &state).await;
        assert!(matches!(exhausted, Err(Error::AgentStepFailure(_))));
    }

    #[tokio::test]
    async fn test_profile_script_wins_over_fallback() {
        let agent = ScriptedAgent::new(vec![AgentStep::Fail {
            reason: "fallback".into(),
        }])
        .with_script(
            "researcher",
            vec![AgentStep::Finish {
                result: json!("profile"),
            }],
        );
        let mut new = NewTask::new("x");
        new.assigned_to = Some("researcher".into());
        let task = new.into_task();

        let step = agent.next(&task, &Continuation::start(&task)).await.unwrap();
        assert_eq!(
            step,
            AgentStep::Finish {
                result: json!("profile")
            }
        );
    }
}
