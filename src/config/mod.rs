mod parser;
use crate::agents::AgentStep;
use crate::constants::{
    DEFAULT_AUTO_ANSWER, DEFAULT_DATABASE_PATH, DEFAULT_SERVER_PORT, DEFAULT_STEP_TIMEOUT,
    DEFAULT_TOOL_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use parser::load_app_config;

/// Main application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Where tasks, interactions and approvals are stored
    #[serde(default)]
    pub storage: StorageConfig,
    /// Execution coordinator tuning
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Agent profiles available for assignment
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
    /// Built-in tools to register
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage backend selection
#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct CoordinatorConfig {
    /// Upper bound on a single agent step, humantime format
    #[serde(default = "default_step_timeout")]
    pub step_timeout: String,
    /// Upper bound on a single tool invocation, humantime format
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout: String,
    /// Answer fed to the agent when auto mode skips a question; `{question}` is substituted
    #[serde(default = "default_auto_answer")]
    pub auto_answer: String,
}

/// A configured agent that tasks can be assigned to
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AgentProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Tools the agent may call without approval
    #[serde(default)]
    pub tool_names: Vec<String>,
    /// Steps replayed by the scripted agent provider
    #[serde(default)]
    pub script: Vec<AgentStep>,
}

impl CoordinatorConfig {
    pub fn step_timeout(&self) -> Result<Duration, crate::errors::Error> {
        parse_duration("step_timeout", &self.step_timeout)
    }

    pub fn tool_timeout(&self) -> Result<Duration, crate::errors::Error> {
        parse_duration("tool_timeout", &self.tool_timeout)
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, crate::errors::Error> {
    humantime::parse_duration(value)
        .map_err(|e| crate::errors::Error::Config(format!("invalid {} '{}': {}", field, value, e)))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            path: default_database_path(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            step_timeout: default_step_timeout(),
            tool_timeout: default_tool_timeout(),
            auto_answer: default_auto_answer(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

fn default_step_timeout() -> String {
    DEFAULT_STEP_TIMEOUT.to_string()
}

fn default_tool_timeout() -> String {
    DEFAULT_TOOL_TIMEOUT.to_string()
}

fn default_auto_answer() -> String {
    DEFAULT_AUTO_ANSWER.to_string()
}

fn default_tools() -> Vec<String> {
    vec!["fs".to_string()]
}
