//! File writing tool

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_bool, required_str};
use poly_fs::FileEngine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{blocking, fs_failure};

/// Tool for writing files atomically, with an optional backup
pub struct WriteFileTool {
    engine: Arc<FileEngine>,
}

impl WriteFileTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the project, creating parent directories as needed. The existing file is backed up first unless backup is false."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                },
                "backup": {
                    "type": "boolean",
                    "description": "Back up the existing file first (default: true)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let path = required_str(&arguments, "path")?;
        let content = required_str(&arguments, "content")?;
        let backup = optional_bool(&arguments, "backup").unwrap_or(true);

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let target = PathBuf::from(path);
        let content = content.to_string();
        let outcome = blocking(&self.engine, move |engine| {
            engine
                .write_file(&target, content.as_bytes(), backup)
                .map_err(fs_failure)
        })
        .await?;

        let mut result = json!({
            "success": true,
            "path": path,
            "backup_created": outcome.backup.is_some(),
        });
        if let Some(backup) = &outcome.backup {
            result["backup_path"] = json!(backup.display().to_string());
        }
        Ok(result.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{args, sandbox};

    #[tokio::test]
    async fn test_write_new_then_overwrite_with_backup() {
        let (dir, engine) = sandbox();
        let file = dir.path().join("src").join("main.rs");
        let path = file.to_str().unwrap().to_string();
        let tool = WriteFileTool::new(engine);

        let out = tool
            .execute(args(json!({"path": path, "content": "v1"})), CancellationToken::new())
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["backup_created"], false);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v1");

        let out = tool
            .execute(args(json!({"path": path, "content": "v2"})), CancellationToken::new())
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(result["backup_created"], true);
        let backup = result["backup_path"].as_str().unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "v1");
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_write_without_backup() {
        let (dir, engine) = sandbox();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "old").unwrap();

        let out = WriteFileTool::new(engine)
            .execute(
                args(json!({"path": file.to_str().unwrap(), "content": "new", "backup": false})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(result["backup_created"], false);
        assert!(result.get("backup_path").is_none());
    }

    #[tokio::test]
    async fn test_blacklisted_extension_refused() {
        let (dir, engine) = sandbox();
        let file = dir.path().join("tool.exe");
        let err = WriteFileTool::new(engine)
            .execute(
                args(json!({"path": file.to_str().unwrap(), "content": "MZ"})),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
        assert!(!file.exists());
    }
}
