//! Agent event types

use poly_ai::{Message, ToolCall};
use serde::{Deserialize, Serialize};

/// Events emitted during a run, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant text as it streams in
    TextDelta { delta: String },

    /// Model reasoning as it streams in
    ReasoningDelta { delta: String },

    /// The model finished a turn by requesting tools
    ToolCallsRequested { calls: Vec<ToolCall> },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// All results of one tool batch
    ToolResults { results: Vec<Message> },

    /// The run finished and its messages are now history
    TurnCommitted { message: Message },

    /// The run failed; history is unchanged
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = AgentEvent::TextDelta {
            delta: "hi".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text_delta");
        assert_eq!(value["delta"], "hi");

        let event = AgentEvent::ToolCallsRequested { calls: vec![] };
        assert_eq!(
            serde_json::to_value(&event).unwrap()["type"],
            "tool_calls_requested"
        );
    }
}
