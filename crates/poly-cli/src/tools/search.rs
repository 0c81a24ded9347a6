//! Content search tool

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_str, required_str};
use poly_fs::FileEngine;
use regex::Regex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::fs_failure;
use crate::utils::truncate_chars;

/// Stop collecting after this many matching lines
const MAX_MATCHES: usize = 1000;
/// Files larger than this are not searched
const MAX_SEARCH_FILE_SIZE: u64 = 5 * 1024 * 1024;
/// Maximum length of a matching line before truncation
const MAX_LINE_LENGTH: usize = 500;
/// Directory names never descended into
pub(crate) const SKIP_DIRS: [&str; 4] = [".git", "node_modules", "target", ".polyagent-backups"];

/// Tool for searching file contents with a regex
pub struct SearchFileContentTool {
    engine: Arc<FileEngine>,
}

impl SearchFileContentTool {
    pub fn new(engine: Arc<FileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for SearchFileContentTool {
    fn name(&self) -> &str {
        "search_file_content"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern in files under a directory. Returns matching lines as path:line: text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (defaults to current directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern for file names to search (e.g., '*.rs')"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let pattern = required_str(&arguments, "pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::invalid(format!("Invalid regex pattern: {}", e)))?;
        let path = PathBuf::from(optional_str(&arguments, "path").unwrap_or("."));
        let include = optional_str(&arguments, "include").map(String::from);

        let engine = Arc::clone(&self.engine);
        let task_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || search(&engine, &path, include, &regex, &task_cancel))
            .await
            .map_err(|e| ToolError::failed(format!("Search task failed: {}", e)))?
    }
}

fn search(
    engine: &FileEngine,
    root: &Path,
    include: Option<String>,
    regex: &Regex,
    cancel: &CancellationToken,
) -> ToolResult {
    let mut walker = engine.walker(root).files_only(true).excludes(SKIP_DIRS);
    if let Some(include) = include {
        walker = walker.include(include);
    }
    let files = walker.walk().map_err(fs_failure)?;

    let mut matches = Vec::new();
    'files: for entry in files {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        if entry.size > MAX_SEARCH_FILE_SIZE {
            continue;
        }

        let display = root.join(&entry.relative);
        let Ok(file) = File::open(&entry.path) else {
            continue;
        };
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            // Binary or non-UTF-8 content ends the file
            let Ok(line) = line else {
                continue 'files;
            };
            if regex.is_match(&line) {
                matches.push(format!(
                    "{}:{}: {}",
                    display.display(),
                    line_num + 1,
                    truncate_chars(&line, MAX_LINE_LENGTH)
                ));
                if matches.len() >= MAX_MATCHES {
                    break 'files;
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok("No matches found".to_string());
    }

    let capped = matches.len() >= MAX_MATCHES;
    let mut output = matches.join("\n");
    if capped {
        output.push_str(&format!("\n\n(stopped at {} matches)", MAX_MATCHES));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{args, sandbox};

    #[tokio::test]
    async fn test_search_with_include() {
        let (dir, engine) = sandbox();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn main() {}\n// TODO: fix\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "TODO: write docs\n").unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let tool = SearchFileContentTool::new(engine);

        let out = tool
            .execute(args(json!({"pattern": "TODO", "path": root})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 2);

        let out = tool
            .execute(
                args(json!({"pattern": "TODO", "path": root, "include": "*.rs"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.ends_with("lib.rs:2: // TODO: fix"), "{}", out);
    }

    #[tokio::test]
    async fn test_search_caps_matches() {
        let (dir, engine) = sandbox();
        let body = "hit\n".repeat(MAX_MATCHES + 50);
        std::fs::write(dir.path().join("big.txt"), body).unwrap();

        let out = SearchFileContentTool::new(engine)
            .execute(
                args(json!({"pattern": "hit", "path": dir.path().to_str().unwrap()})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.ends_with("(stopped at 1000 matches)"));
        assert_eq!(out.lines().filter(|l| l.contains(": hit")).count(), MAX_MATCHES);
    }

    #[tokio::test]
    async fn test_search_skips_vcs_dirs_and_reports_none() {
        let (dir, engine) = sandbox();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "needle").unwrap();

        let out = SearchFileContentTool::new(engine)
            .execute(
                args(json!({"pattern": "needle", "path": dir.path().to_str().unwrap()})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "No matches found");
    }

    #[tokio::test]
    async fn test_invalid_regex() {
        let (_dir, engine) = sandbox();
        let err = SearchFileContentTool::new(engine)
            .execute(args(json!({"pattern": "(["})), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
