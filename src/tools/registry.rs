use crate::config::AgentProfile;
use crate::core::Task;
use crate::tools::{FileSystemTool, Tool, ToolInvoker};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Holds the registered tools and the per-agent grants
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    /// Agent id to the tools it may call without approval
    agent_tools: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    /// Builds a registry from the configured built-in tool names and agent profiles
    ///
    /// # Arguments
    /// * `tool_names` - Built-in tools to register; unknown names are skipped
    /// * `profiles` - Agent profiles whose `tool_names` become their granted set
    pub fn new(tool_names: &[String], profiles: &[AgentProfile]) -> Self {
        let tools = tool_names
            .iter()
            .filter_map(|name| match name.as_str() {
                "fs" => Some(Box::new(FileSystemTool) as Box<dyn Tool>),
                _ => {
                    warn!("Unknown tool: {}", name);
                    None
                }
            })
            .collect();

        let agent_tools = profiles
            .iter()
            .map(|p| (p.id.clone(), p.tool_names.clone()))
            .collect();

        let registry = ToolRegistry { tools, agent_tools };
        for tool in &registry.tools {
            for action in tool.get_actions() {
                debug!("Tool {}: {}", tool.name(), action);
            }
        }
        registry
    }

    pub fn get_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| &**t)
    }
}

#[async_trait::async_trait]
impl ToolInvoker for ToolRegistry {
    fn is_allowed(&self, task: &Task, name: &str) -> bool {
        if task.additional_tool_names.iter().any(|t| t == name) {
            return true;
        }
        task.assigned_to
            .as_deref()
            .and_then(|agent| self.agent_tools.get(agent))
            .is_some_and(|granted| granted.iter().any(|t| t == name))
    }

    async fn invoke(&self, name: &str, args: &Value) -> Result<String, String> {
        match self.get_tool(name) {
            Some(tool) => tool.invoke(args).await,
            None => Err(format!("Unknown tool '{}'", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewTask;
    use serde_json::json;

    fn profile(id: &str, tools: &[&str]) -> AgentProfile {
        AgentProfile {
            id: id.to_string(),
            tool_names: tools.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_allowed_set_is_agent_tools_plus_task_grants() {
        let registry = ToolRegistry::new(&["fs".into()], &[profile("researcher", &["fs"])]);

        let mut new = NewTask::new("x");
        new.assigned_to = Some("researcher".into());
        let mut task = new.into_task();
        assert!(registry.is_allowed(&task, "fs"));
        assert!(!registry.is_allowed(&task, "web_search"));

        task.additional_tool_names.push("web_search".into());
        assert!(registry.is_allowed(&task, "web_search"));

        let unassigned = NewTask::new("y").into_task();
        assert!(!registry.is_allowed(&unassigned, "fs"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_invocation_error() {
        let registry = ToolRegistry::new(&["fs".into(), "teleport".into()], &[]);
        assert!(registry.get_tool("fs").is_some());
        assert!(registry.get_tool("teleport").is_none());

        let result = registry.invoke("teleport", &json!({})).await;
        assert_eq!(result, Err("Unknown tool 'teleport'".to_string()));
    }
}
