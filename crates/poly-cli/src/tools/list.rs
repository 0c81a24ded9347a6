//! List directory tool

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_str, optional_str_list};
use poly_fs::FileEngine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::fs_failure;

/// Tool for listing directory contents
pub struct ListDirectoryTool {
    engine: Arc<FileEngine>,
}

impl ListDirectoryTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are shown with a trailing '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list (defaults to current directory)"
                },
                "ignore": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Glob patterns of entry names to leave out"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let path = optional_str(&arguments, "path").unwrap_or(".");
        let ignore = optional_str_list(&arguments, "ignore")
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| ToolError::invalid(format!("Invalid ignore pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let entries = self.engine.list_dir(Path::new(path)).map_err(fs_failure)?;
        let lines: Vec<String> = entries
            .into_iter()
            .filter(|e| !ignore.iter().any(|p| p.matches(&e.name)))
            .map(|e| {
                if e.is_dir {
                    format!("{}/", e.name)
                } else {
                    e.name
                }
            })
            .collect();

        if lines.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        Ok(lines.join("\n"))
    }
}
