//! poly-agent: the conversation loop
//!
//! This crate drives multi-turn conversations against a streaming model:
//! it pumps deltas to subscribers, reassembles tool calls, dispatches them
//! through a registry and commits each run to history atomically.

pub mod agent;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod tool;
pub mod transport;
pub mod turn;

pub use agent::{Agent, AgentConfig};
pub use conversation::{AlignmentError, Conversation, LoopState, check_alignment};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use handle::AgentHandle;
pub use tool::{Arguments, BoxedTool, Registry, Tool, ToolError, ToolRegistry, ToolResult};
pub use transport::Transport;
