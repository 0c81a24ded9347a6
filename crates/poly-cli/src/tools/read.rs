//! File reading tool

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_bool, optional_u64, required_str};
use poly_fs::FileEngine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{blocking, fs_failure};

const MAX_LINES: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

/// Tool for reading file contents through the file engine
pub struct ReadFileTool {
    engine: Arc<FileEngine>,
}

impl ReadFileTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file inside the project. Results are cached; set force_refresh to bypass the cache. For large files, use offset and limit."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative or absolute)"
                },
                "force_refresh": {
                    "type": "boolean",
                    "description": "Skip the cache and read from disk (default: false)"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let path = required_str(&arguments, "path")?;
        let force_refresh = optional_bool(&arguments, "force_refresh").unwrap_or(false);

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let path = PathBuf::from(path);
        let content = blocking(&self.engine, move |engine| {
            engine.read_to_string(&path, force_refresh).map_err(fs_failure)
        })
        .await?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        if total_lines == 0 {
            return Ok("(empty file)".to_string());
        }

        // 1-indexed to 0-indexed
        let offset = optional_u64(&arguments, "offset")
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = optional_u64(&arguments, "limit")
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES);

        if offset >= total_lines {
            return Err(ToolError::invalid(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            )));
        }

        let end = offset.saturating_add(limit).min(total_lines);
        let mut had_truncated = false;
        let formatted: Vec<String> = lines[offset..end]
            .iter()
            .map(|line| {
                if line.chars().count() > MAX_LINE_LENGTH {
                    had_truncated = true;
                    line.chars().take(MAX_LINE_LENGTH).collect()
                } else {
                    line.to_string()
                }
            })
            .collect();

        let mut output = formatted.join("\n");

        let mut notices = Vec::new();
        if had_truncated {
            notices.push(format!(
                "Some lines were truncated to {} characters",
                MAX_LINE_LENGTH
            ));
        }
        if end < total_lines {
            notices.push(format!(
                "{} more lines not shown. Use offset={} to continue reading",
                total_lines - end,
                end + 1
            ));
        }
        if !notices.is_empty() {
            output.push_str(&format!("\n\n... ({})", notices.join(". ")));
        }

        Ok(output)
    }
}
