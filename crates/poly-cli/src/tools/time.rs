//! Current time tool

use std::fmt::Write;

use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat};
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_str};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Tool that reports the local time
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Render `now` in a named format or a strftime string
fn format_time(now: DateTime<Local>, format: &str) -> Result<String, ToolError> {
    match format {
        "" | "rfc3339" => Ok(now.to_rfc3339_opts(SecondsFormat::Secs, false)),
        "long" => Ok(now.format("%a, %d %b %Y %H:%M:%S %Z").to_string()),
        "short" => Ok(now.format("%H:%M:%S").to_string()),
        custom => {
            let mut out = String::new();
            // chrono reports bad specifiers through fmt::Error
            write!(out, "{}", now.format(custom))
                .map_err(|_| ToolError::invalid(format!("Invalid time format '{}'", custom)))?;
            Ok(out)
        }
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local time. format may be 'rfc3339' (default), 'long', 'short' or a strftime string like '%Y-%m-%d'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "rfc3339, long, short, or a strftime format string"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Arguments, _cancel: CancellationToken) -> ToolResult {
        let format = optional_str(&arguments, "format").unwrap_or("");
        format_time(Local::now(), format)
    }
}
