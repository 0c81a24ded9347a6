//! Conversation history persistence

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use poly_ai::Message;
use serde::{Deserialize, Serialize};

/// Messages kept on disk
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// The saved history file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub saved_at: Option<DateTime<Utc>>,
    pub working_dir: Option<String>,
    pub messages: Vec<Message>,
}

impl History {
    /// Default history file location
    pub fn default_path(config_dir: &Path) -> PathBuf {
        config_dir.join("history.json")
    }

    /// Load saved history; a missing file is empty history
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the last `MAX_HISTORY_ENTRIES` messages, atomically.
    ///
    /// The cut never starts on a tool result, so a loaded history stays
    /// aligned with its tool calls.
    pub fn save(path: &Path, messages: &[Message]) -> anyhow::Result<()> {
        let history = Self {
            saved_at: Some(Utc::now()),
            working_dir: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
            messages: tail(messages, MAX_HISTORY_ENTRIES).to_vec(),
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&history)?)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!("Saved {} history messages to {}", history.messages.len(), path.display());
        Ok(())
    }

    /// Render for `--history`
    pub fn render(&self) -> String {
        if self.messages.is_empty() {
            return "No saved history.".to_string();
        }

        let mut out = String::new();
        if let Some(saved_at) = self.saved_at {
            out.push_str(&format!(
                "Saved {} ({} messages)\n\n",
                saved_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
                self.messages.len()
            ));
        }
        for message in &self.messages {
            let body = if message.has_tool_calls() {
                let names: Vec<&str> = message.tool_calls().iter().map(|c| c.name()).collect();
                format!("[tool calls: {}]", names.join(", "))
            } else {
                crate::utils::preview(message.text(), 120)
            };
            out.push_str(&format!("{:>9}: {}\n", message.role.as_str(), body));
        }
        out
    }
}

/// The last `max` messages, moved forward past any leading tool results
fn tail(messages: &[Message], max: usize) -> &[Message] {
    let mut start = messages.len().saturating_sub(max);
    while start < messages.len() && messages[start].role == poly_ai::Role::Tool {
        start += 1;
    }
    &messages[start..]
}
