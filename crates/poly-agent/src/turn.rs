//! Per-stream turn state and the decoder pump

use std::time::Duration;

use futures::StreamExt;
use poly_ai::{DeltaStream, StreamEvent, ToolCallAccumulator, ToolCallFragment};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;

/// Queue capacities between the pump and the loop
pub const TEXT_QUEUE: usize = 10;
pub const REASONING_QUEUE: usize = 10;
pub const FRAGMENT_QUEUE: usize = 5;
pub const ERROR_QUEUE: usize = 1;

/// How long a text or reasoning delta may wait for queue space before it is dropped
pub const DELTA_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// What to do after a mid-stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No text surfaced yet: send the same request again
    Replay,
    /// Text surfaced, no tool calls: ask the model to continue from it
    Continue,
    /// Tool-call fragments surfaced: give up
    Fatal,
}

/// Transient state of one model turn, across stream retries
#[derive(Debug, Default)]
pub struct StreamTurn {
    pub text: String,
    pub reasoning: String,
    pub accumulator: ToolCallAccumulator,
    pub retries: u32,
    /// Any delta of this turn was already surfaced to the UI
    pub committed: bool,
    pub saw_tool_fragments: bool,
}

impl StreamTurn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide how to recover from a stream failure
    pub fn recovery(&self) -> Recovery {
        if self.saw_tool_fragments {
            Recovery::Fatal
        } else if self.text.is_empty() {
            // Reasoning alone gives a continuation nothing to extend.
            Recovery::Replay
        } else {
            Recovery::Continue
        }
    }

    /// Drop buffered output before a replay; the retry count survives
    pub fn reset_buffers(&mut self) {
        self.text.clear();
        self.reasoning.clear();
        self.accumulator = ToolCallAccumulator::new();
        self.committed = false;
        self.saw_tool_fragments = false;
    }

    /// Fold a finished pump's output into this turn
    pub fn absorb(&mut self, output: PumpOutput) {
        self.text.push_str(&output.text);
        self.reasoning.push_str(&output.reasoning);
        self.committed |= output.committed;
    }
}

/// Everything the pump read, independent of what was delivered through the queues
#[derive(Debug, Default)]
pub struct PumpOutput {
    pub text: String,
    pub reasoning: String,
    pub committed: bool,
}

/// Receiving ends of the pump queues
pub struct PumpQueues {
    pub text: mpsc::Receiver<String>,
    pub reasoning: mpsc::Receiver<String>,
    pub fragments: mpsc::Receiver<ToolCallFragment>,
    pub errors: mpsc::Receiver<poly_ai::Error>,
}

/// Spawn a task that drains `stream` into bounded queues.
///
/// Text and reasoning are lossy under backpressure; fragments and errors are
/// not. The full text and reasoning come back through the `JoinHandle`.
pub fn spawn_pump(mut stream: DeltaStream) -> (JoinHandle<PumpOutput>, PumpQueues) {
    let (text_tx, text_rx) = mpsc::channel(TEXT_QUEUE);
    let (reasoning_tx, reasoning_rx) = mpsc::channel(REASONING_QUEUE);
    let (fragment_tx, fragment_rx) = mpsc::channel(FRAGMENT_QUEUE);
    let (error_tx, error_rx) = mpsc::channel(ERROR_QUEUE);

    let task = tokio::spawn(async move {
        let mut out = PumpOutput::default();

        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamEvent::Delta(delta)) => {
                    if let Some(text) = delta.content {
                        out.text.push_str(&text);
                        out.committed = true;
                        offer(&text_tx, text, "text").await;
                    }
                    if let Some(reasoning) = delta.reasoning {
                        out.reasoning.push_str(&reasoning);
                        out.committed = true;
                        offer(&reasoning_tx, reasoning, "reasoning").await;
                    }
                    for fragment in delta.tool_calls {
                        out.committed = true;
                        if fragment_tx.send(fragment).await.is_err() {
                            return out;
                        }
                    }
                }
                Ok(StreamEvent::Done) => break,
                Err(e) => {
                    let _ = error_tx.send(e).await;
                    break;
                }
            }
        }

        out
    });

    (
        task,
        PumpQueues {
            text: text_rx,
            reasoning: reasoning_rx,
            fragments: fragment_rx,
            errors: error_rx,
        },
    )
}

async fn offer(tx: &mpsc::Sender<String>, delta: String, kind: &str) {
    match tx.send_timeout(delta, DELTA_SEND_TIMEOUT).await {
        Ok(()) => {}
        Err(SendTimeoutError::Timeout(dropped)) => {
            tracing::trace!("Dropped {} delta ({} bytes): queue full", kind, dropped.len());
        }
        Err(SendTimeoutError::Closed(_)) => {}
    }
}
