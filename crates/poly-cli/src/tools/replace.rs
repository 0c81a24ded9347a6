//! Text replacement tool

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_bool, required_str};
use poly_fs::FileEngine;
use regex::Regex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{blocking, fs_failure};

/// Tool for replacing text in a file, literally or by regex
pub struct ReplaceTool {
    engine: Arc<FileEngine>,
}

impl ReplaceTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ReplaceTool {
    fn name(&self) -> &str {
        "replace"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of a string (or regex match) in a file. The file is backed up before it is modified unless backup is false."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "Text or regex pattern to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text; with use_regex, $1 etc. refer to capture groups"
                },
                "use_regex": {
                    "type": "boolean",
                    "description": "Treat old_string as a regex (default: false)"
                },
                "backup": {
                    "type": "boolean",
                    "description": "Back up the file before modifying it (default: true)"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let file_path = required_str(&arguments, "file_path")?;
        let old_string = required_str(&arguments, "old_string")?;
        let new_string = required_str(&arguments, "new_string")?;
        let use_regex = optional_bool(&arguments, "use_regex").unwrap_or(false);
        let backup = optional_bool(&arguments, "backup").unwrap_or(true);

        if old_string.is_empty() {
            return Err(ToolError::invalid("'old_string' must not be empty"));
        }

        let re = if use_regex {
            Some(
                Regex::new(old_string)
                    .map_err(|e| ToolError::invalid(format!("Invalid regex pattern: {}", e)))?,
            )
        } else {
            None
        };

        let edit = Edit {
            path: PathBuf::from(file_path),
            old_string: old_string.to_string(),
            new_string: new_string.to_string(),
            regex: re,
            backup,
        };
        let replacements = blocking(&self.engine, move |engine| edit.apply(engine, &cancel)).await?;

        Ok(json!({
            "success": true,
            "file_path": file_path,
            "replacements": replacements,
        })
        .to_string())
    }
}

/// One replace-all edit, run on the blocking pool
struct Edit {
    path: PathBuf,
    old_string: String,
    new_string: String,
    regex: Option<Regex>,
    backup: bool,
}

impl Edit {
    /// Apply the edit, returning the number of replacements
    fn apply(&self, engine: &FileEngine, cancel: &CancellationToken) -> Result<usize, ToolError> {
        let bytes = engine.read_file(&self.path, true).map_err(fs_failure)?;
        let content = String::from_utf8(bytes).map_err(|e| {
            ToolError::failed(format!(
                "{} is not valid UTF-8 (invalid byte at offset {}); refusing to edit it as text",
                self.path.display(),
                e.utf8_error().valid_up_to()
            ))
        })?;

        let (new_content, replacements) = match &self.regex {
            Some(re) => {
                let count = re.find_iter(&content).count();
                (re.replace_all(&content, self.new_string.as_str()).into_owned(), count)
            }
            None => {
                let count = content.matches(self.old_string.as_str()).count();
                (content.replace(self.old_string.as_str(), &self.new_string), count)
            }
        };

        if replacements == 0 {
            return Err(ToolError::failed(format!(
                "Could not find the text in {}. The old string must match exactly including whitespace and newlines.",
                self.path.display()
            )));
        }

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        engine
            .write_file(&self.path, new_content.as_bytes(), self.backup)
            .map_err(fs_failure)?;
        Ok(replacements)
    }
}
