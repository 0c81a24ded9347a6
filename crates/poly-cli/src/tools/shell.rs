//! Shell command execution tool

use std::process::Stdio;

use async_trait::async_trait;
use poly_agent::tool::{Arguments, Tool, ToolError, ToolResult, optional_u64, required_str};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum output size in bytes before truncation
const MAX_OUTPUT_SIZE: usize = 100_000; // 100KB
/// Maximum number of lines before truncation
const MAX_OUTPUT_LINES: usize = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Output collected from one stream of the child
#[derive(Default)]
struct Captured {
    text: String,
    lines: usize,
    truncated: bool,
}

impl Captured {
    fn push(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.lines >= MAX_OUTPUT_LINES || self.text.len() + line.len() > MAX_OUTPUT_SIZE {
            self.truncated = true;
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn notice(&self, stream: &str) -> Option<String> {
        self.truncated.then(|| {
            format!(
                "\n\n... ({} truncated at {} lines / {}KB)",
                stream,
                self.lines,
                MAX_OUTPUT_SIZE / 1024
            )
        })
    }
}

/// Tool for executing shell commands
pub struct ShellTool;

impl ShellTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the current working directory. Returns stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult {
        let command = required_str(&arguments, "command")?;
        let timeout_secs = optional_u64(&arguments, "timeout").unwrap_or(DEFAULT_TIMEOUT_SECS);

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut child = Command::new(shell)
            .arg(shell_arg)
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::failed(format!("Failed to spawn command: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::failed("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::failed("Failed to capture stderr"))?;
        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        let mut out = Captured::default();
        let mut err = Captured::default();
        let (mut stdout_open, mut stderr_open) = (true, true);

        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(timeout_secs);

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(ToolError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = child.kill().await;
                    return Err(ToolError::failed(format!(
                        "{}\n{}\n\nCommand timed out after {} seconds",
                        out.text, err.text, timeout_secs
                    )));
                }
                line = stdout_reader.next_line(), if stdout_open => match line {
                    Ok(Some(l)) => out.push(&l),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        err.push(&format!("Stdout read error: {}", e));
                        stdout_open = false;
                    }
                },
                line = stderr_reader.next_line(), if stderr_open => match line {
                    Ok(Some(l)) => err.push(&l),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        err.push(&format!("Stderr read error: {}", e));
                        stderr_open = false;
                    }
                },
                status = child.wait(), if !stdout_open && !stderr_open => {
                    break status.map_err(|e| ToolError::failed(format!("Failed to wait for command: {}", e)))?;
                }
            }
        };

        let mut result = out.text.clone();
        if let Some(notice) = out.notice("stdout") {
            result.push_str(&notice);
        }
        if !err.text.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&err.text);
            if let Some(notice) = err.notice("stderr") {
                result.push_str(&notice);
            }
        }
        if result.is_empty() {
            result = "(no output)".to_string();
        }

        if status.success() {
            Ok(result)
        } else {
            Err(ToolError::failed(format!(
                "{}\n\nCommand exited with code {}",
                result,
                status.code().unwrap_or(-1)
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::testing::args;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_stdout_and_stderr() {
        let out = ShellTool::new()
            .execute(
                args(json!({"command": "echo hello; echo oops 1>&2"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "hello\noops");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let err = ShellTool::new()
            .execute(args(json!({"command": "echo partial; exit 3"})), CancellationToken::new())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("partial"));
        assert!(text.contains("exited with code 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let started = Instant::now();
        let err = ShellTool::new()
            .execute(args(json!({"command": "sleep 30", "timeout": 1})), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 1 seconds"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_kills_command() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ShellTool::new()
            .execute(args(json!({"command": "sleep 30"})), cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_truncated_by_lines() {
        let out = ShellTool::new()
            .execute(args(json!({"command": "seq 1 1500"})), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.contains("stdout truncated at 1000 lines"));
        assert!(!out.contains("\n1001\n"));
    }
}
