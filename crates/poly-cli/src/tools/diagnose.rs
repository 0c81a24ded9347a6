//! File diagnosis tool

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, required_str};
use poly_fs::FileEngine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Tool that explains why a path can or cannot be accessed
pub struct DiagnoseFileTool {
    engine: Arc<FileEngine>,
}

impl DiagnoseFileTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for DiagnoseFileTool {
    fn name(&self) -> &str {
        "diagnose_file"
    }

    fn description(&self) -> &str {
        "Diagnose file access problems: sandbox validation, existence, size limit and cache status, with suggestions."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to diagnose"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Arguments, _cancel: CancellationToken) -> ToolResult {
        let path = required_str(&arguments, "path")?;
        let diagnosis = self.engine.diagnose(Path::new(path));
        serde_json::to_string_pretty(&diagnosis)
            .map_err(|e| ToolError::failed(format!("Failed to encode diagnosis: {}", e)))
    }
}
