//! Conversation history and loop state

use std::collections::{HashSet, VecDeque};

use poly_ai::{Message, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where the conversation loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Idle,
    Streaming,
    ToolsPending,
    ExecutingTools,
    Committed,
}

/// A broken link between tool calls and tool results
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("message {index}: tool result has no matching pending call '{id}'")]
    OrphanResult { index: usize, id: String },

    #[error("message {index}: result for '{found}' arrived before the result for '{expected}'")]
    OutOfOrder {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("message {index}: call '{id}' was never answered")]
    UnansweredCall { index: usize, id: String },

    #[error("message {index}: assistant message has both text and tool calls")]
    MixedAssistant { index: usize },
}

/// Append-only message history
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously saved messages
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Whether history already carries a system message
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::System)
    }

    /// Append one run's messages in a single step
    pub(crate) fn commit(&mut self, run: Vec<Message>) {
        self.messages.extend(run);
    }

    /// Messages to send upstream: history plus a run's pending messages,
    /// with the system prompt in front unless one is already present.
    pub fn request_messages(&self, system_prompt: Option<&str>, pending: &[Message]) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + pending.len() + 1);
        let has_system = self.has_system_message() || pending.iter().any(|m| m.role == Role::System);
        if let Some(prompt) = system_prompt.filter(|_| !has_system) {
            out.push(Message::system(prompt));
        }
        out.extend(self.messages.iter().cloned());
        out.extend(pending.iter().cloned());
        out
    }

    /// Check that the tool results after each tool-calling assistant message
    /// answer its calls exactly once, in the order the calls were issued.
    pub fn check_turn_alignment(&self) -> Result<(), AlignmentError> {
        check_alignment(&self.messages)
    }
}

/// Alignment check over any message sequence
pub fn check_alignment(messages: &[Message]) -> Result<(), AlignmentError> {
    // Calls of the latest tool-calling assistant message not yet answered,
    // in issue order, with that message's index.
    let mut open: Option<(usize, VecDeque<String>)> = None;

    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.clone().unwrap_or_default();
                let Some((_, ids)) = open.as_mut() else {
                    return Err(AlignmentError::OrphanResult { index, id });
                };
                match ids.front().cloned() {
                    Some(expected) if expected == id => {
                        ids.pop_front();
                    }
                    Some(expected) if ids.contains(&id) => {
                        return Err(AlignmentError::OutOfOrder {
                            index,
                            expected,
                            found: id,
                        });
                    }
                    _ => return Err(AlignmentError::OrphanResult { index, id }),
                }
            }
            _ => {
                if let Some((at, ids)) = open.take() {
                    if let Some(id) = ids.into_iter().next() {
                        return Err(AlignmentError::UnansweredCall { index: at, id });
                    }
                }
                if message.role == Role::Assistant && message.has_tool_calls() {
                    if message.content.as_deref().is_some_and(|c| !c.is_empty()) {
                        return Err(AlignmentError::MixedAssistant { index });
                    }
                    let mut seen = HashSet::new();
                    let ids = message
                        .tool_calls()
                        .iter()
                        .map(|c| c.id.clone())
                        .filter(|id| seen.insert(id.clone()))
                        .collect();
                    open = Some((index, ids));
                }
            }
        }
    }

    if let Some((at, ids)) = open {
        if let Some(id) = ids.into_iter().next() {
            return Err(AlignmentError::UnansweredCall { index: at, id });
        }
    }
    Ok(())
}
