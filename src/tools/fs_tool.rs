use crate::tools::{Tool, ToolAction};
use serde_json::Value;

/// Tool for interacting with the filesystem
///
/// Arguments are a JSON object with an `action` field and the action's
/// parameters, e.g. `{"action": "read", "path": "/tmp/a.txt"}`.
pub struct FileSystemTool;

impl std::fmt::Debug for FileSystemTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileSystemTool")
    }
}

fn str_arg<'a>(args: &'a Value, key: &str, action: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Missing parameter '{}' for '{}' action", key, action))
}

#[async_trait::async_trait]
impl Tool for FileSystemTool {
    fn name(&self) -> &str {
        "fs"
    }

    /// Handles filesystem actions like reading and writing files
    ///
    /// # Arguments
    /// * `args` - Object carrying `action` plus `path`, `paths` or `content`
    ///
    /// # Returns
    /// * `Result<String, String>` - Tool output or error message
    async fn invoke(&self, args: &Value) -> Result<String, String> {
        let action = args
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| "Missing 'action' argument".to_string())?;

        match action {
            "read" => {
                let path = str_arg(args, "path", action)?;
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| e.to_string())
            }
            "read_multiple" => {
                let paths = args
                    .get("paths")
                    .and_then(Value::as_array)
                    .ok_or_else(|| "Missing parameter 'paths' for 'read_multiple' action".to_string())?;
                let mut files = Vec::new();
                for path in paths.iter().filter_map(Value::as_str) {
                    let content = tokio::fs::read_to_string(path)
                        .await
                        .map_err(|e| format!("{}: {}", path, e))?;
                    files.push(format!("File: {}\n{}", path, content));
                }
                Ok(files.join("\n\n"))
            }
            "list_directory" => {
                let path = str_arg(args, "path", action)?;
                let mut entries = tokio::fs::read_dir(path).await.map_err(|e| e.to_string())?;
                let mut files = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
                    if let Ok(file_name) = entry.file_name().into_string() {
                        files.push(file_name);
                    }
                }
                files.sort();
                Ok(format!(
                    "Files found:\n{}",
                    files
                        .iter()
                        .enumerate()
                        .map(|(i, f)| format!("{}. {}", i + 1, f))
                        .collect::<Vec<_>>()
                        .join("\n")
                        + "\n"
                ))
            }
            "write" => {
                let path = str_arg(args, "path", action)?;
                let content = str_arg(args, "content", action)?;
                tokio::fs::write(path, content)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok("File written successfully".into())
            }
            _ => Err(format!("Unknown action '{}'", action)),
        }
    }

    fn get_actions(&self) -> Vec<ToolAction> {
        vec![
            ToolAction {
                name: "read".to_string(),
                arg_names: vec!["path".to_string()],
                description: "Read a file".to_string(),
            },
            ToolAction {
                name: "read_multiple".to_string(),
                arg_names: vec!["paths".to_string()],
                description: "Read several files at once".to_string(),
            },
            ToolAction {
                name: "list_directory".to_string(),
                arg_names: vec!["path".to_string()],
                description: "List files in a directory".to_string(),
            },
            ToolAction {
                name: "write".to_string(),
                arg_names: vec!["path".to_string(), "content".to_string()],
                description: "Write to a file".to_string(),
            },
        ]
    }
}
