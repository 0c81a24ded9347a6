//! poly-ai: chat-completion wire layer
//!
//! This crate talks to an OpenAI-shaped streaming chat API: a retrying HTTP
//! transport, an SSE delta decoder and a tool-call accumulator.

pub mod accumulator;
pub mod client;
pub mod error;
pub mod http;
pub mod sse;
pub mod types;

pub use accumulator::{SealedToolCall, ToolCallAccumulator, parse_arguments};
pub use client::ChatClient;
pub use error::{Error, Result};
pub use http::{BackoffTransport, RetryConfig};
pub use sse::{Delta, DeltaStream, StreamEvent, ToolCallFragment};
pub use types::*;
