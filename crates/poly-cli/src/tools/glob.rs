//! Glob file pattern matching tool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_str, optional_u64, required_str};
use poly_fs::FileEngine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::fs_failure;
use super::search::SKIP_DIRS;

const MAX_RESULTS: usize = 500;

/// Tool for finding files matching a glob pattern
pub struct GlobTool {
    engine: Arc<FileEngine>,
}

impl GlobTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern relative to a directory. Supports patterns like '**/*.rs' and 'src/*.ts'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to match (e.g., '**/*.rs', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "Directory the pattern is relative to (defaults to current directory)"
                },
                "max_depth": {
                    "type": "integer",
                    "description": "Maximum directory depth to descend (optional)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let pattern = required_str(&arguments, "pattern")?;
        let pattern = Pattern::new(pattern)
            .map_err(|e| ToolError::invalid(format!("Invalid glob pattern: {}", e)))?;
        let root = PathBuf::from(optional_str(&arguments, "path").unwrap_or("."));
        let max_depth = optional_u64(&arguments, "max_depth").map(|d| d as usize);

        let engine = Arc::clone(&self.engine);
        let task_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || find(&engine, &root, &pattern, max_depth, &task_cancel))
            .await
            .map_err(|e| ToolError::failed(format!("Glob task failed: {}", e)))?
    }
}

fn find(
    engine: &FileEngine,
    root: &Path,
    pattern: &Pattern,
    max_depth: Option<usize>,
    cancel: &CancellationToken,
) -> ToolResult {
    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    };

    let entries = engine
        .walker(root)
        .files_only(true)
        .excludes(SKIP_DIRS)
        .max_depth(max_depth)
        .walk()
        .map_err(fs_failure)?;

    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    let mut results: Vec<String> = entries
        .iter()
        .filter(|e| pattern.matches_path_with(&e.relative, options))
        .map(|e| root.join(&e.relative).display().to_string())
        .collect();
    results.sort();

    if results.is_empty() {
        return Ok("No files matched the pattern".to_string());
    }

    let truncated = results.len() > MAX_RESULTS;
    results.truncate(MAX_RESULTS);
    let mut output = results.join("\n");
    if truncated {
        output.push_str(&format!("\n\n(showing first {} results)", MAX_RESULTS));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{args, sandbox};

    fn tree() -> (tempfile::TempDir, Arc<FileEngine>) {
        let (dir, engine) = sandbox();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/bin/tool.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/notes.md"), "").unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn test_recursive_pattern() {
        let (dir, engine) = tree();
        let root = dir.path().to_str().unwrap().to_string();
        let out = GlobTool::new(engine)
            .execute(args(json!({"pattern": "**/*.rs", "path": root})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 3);
        assert!(!out.contains("notes.md"));
    }

    #[tokio::test]
    async fn test_star_does_not_cross_directories() {
        let (dir, engine) = tree();
        let root = dir.path().to_str().unwrap().to_string();
        let out = GlobTool::new(engine)
            .execute(args(json!({"pattern": "src/*.rs", "path": root})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.ends_with("lib.rs"));
    }

    #[tokio::test]
    async fn test_max_depth() {
        let (dir, engine) = tree();
        let root = dir.path().to_str().unwrap().to_string();
        let out = GlobTool::new(engine)
            .execute(
                args(json!({"pattern": "**/*.rs", "path": root, "max_depth": 2})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(!out.contains("tool.rs"));
    }

    #[tokio::test]
    async fn test_no_match() {
        let (dir, engine) = tree();
        let out = GlobTool::new(engine)
            .execute(
                args(json!({"pattern": "*.py", "path": dir.path().to_str().unwrap()})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "No files matched the pattern");
    }
}
