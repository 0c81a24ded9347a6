//! The conversation loop

use std::sync::Arc;

use poly_ai::{Message, ToolCall, http::cancellable_sleep};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    conversation::{Conversation, LoopState},
    error::{Error, Result},
    events::AgentEvent,
    handle::AgentHandle,
    tool::{ToolError, ToolRegistry},
    transport::Transport,
    turn::{Recovery, StreamTurn, spawn_pump},
};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt, sent once at the head of every request
    pub system_prompt: Option<String>,
    /// Tool rounds allowed in one run
    pub max_tool_rounds: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: 25,
        }
    }
}

/// How a turn ended
enum TurnEnd {
    Text(String),
    ToolCalls(Vec<poly_ai::SealedToolCall>),
}

/// The main agent that orchestrates conversations
pub struct Agent {
    config: AgentConfig,
    conversation: Conversation,
    registry: Arc<dyn ToolRegistry>,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<AgentEvent>,
    handle: AgentHandle,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn ToolRegistry>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversation: Conversation::default(),
            registry,
            transport,
            event_tx,
            handle: AgentHandle::new(),
        }
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Current loop state
    pub fn state(&self) -> LoopState {
        self.handle.state()
    }

    /// Committed history
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Get all committed messages
    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Clear all messages
    pub fn clear_messages(&mut self) {
        self.conversation.clear();
    }

    /// Get a cloneable handle for poking the agent from external code.
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Send a user message and run until the model answers without tools.
    ///
    /// The run's messages are committed to history only on success. On
    /// cancellation or failure history is left exactly as it was.
    pub async fn prompt(&mut self, input: &str) -> Result<()> {
        let cancel = self.handle.reset_cancel();
        self.handle.mark_running();

        let result = self.run(Message::user(input), &cancel).await;

        match &result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Run cancelled; pending messages discarded");
            }
            Err(e) => {
                let _ = self.event_tx.send(AgentEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        self.handle.mark_idle();
        result
    }

    async fn run(&mut self, user: Message, cancel: &CancellationToken) -> Result<()> {
        let tools = self.registry.list_tools();
        let mut pending = vec![user];
        let mut rounds = 0u32;

        loop {
            match self.stream_turn(&pending, &tools, cancel).await? {
                TurnEnd::Text(text) => {
                    self.handle.set_state(LoopState::Committed);
                    let message = Message::assistant(text);
                    pending.push(message.clone());
                    self.conversation.commit(pending);
                    let _ = self.event_tx.send(AgentEvent::TurnCommitted { message });
                    return Ok(());
                }
                TurnEnd::ToolCalls(calls) => {
                    rounds += 1;
                    if rounds > self.config.max_tool_rounds {
                        return Err(Error::TooManyToolRounds(self.config.max_tool_rounds));
                    }

                    self.handle.set_state(LoopState::ToolsPending);
                    let wire: Vec<ToolCall> = calls.iter().map(|c| c.to_tool_call()).collect();
                    pending.push(Message::assistant_tool_calls(wire.clone()));
                    let _ = self
                        .event_tx
                        .send(AgentEvent::ToolCallsRequested { calls: wire });

                    self.handle.set_state(LoopState::ExecutingTools);
                    let results = self.execute_tool_calls(&calls, cancel).await?;
                    pending.extend(results.iter().cloned());
                    let _ = self.event_tx.send(AgentEvent::ToolResults { results });
                }
            }
        }
    }

    /// One model turn, including recovery from mid-stream failures.
    async fn stream_turn(
        &self,
        pending: &[Message],
        tools: &[poly_ai::Tool],
        cancel: &CancellationToken,
    ) -> Result<TurnEnd> {
        let retry = self.transport.retry_config();
        let mut turn = StreamTurn::new();

        loop {
            self.handle.set_state(LoopState::Streaming);

            let mut request = self
                .conversation
                .request_messages(self.config.system_prompt.as_deref(), pending);
            if !turn.text.is_empty() {
                // Continuation after a failure: the model sees what it already said.
                request.push(Message::assistant(turn.text.clone()));
            }

            let stream = self.transport.open(&request, tools, cancel).await?;
            let failure = self.consume(stream, &mut turn, cancel).await?;

            let Some(err) = failure else {
                turn.accumulator.seal();
                let calls = turn.accumulator.into_sealed()?;
                return Ok(if calls.is_empty() {
                    TurnEnd::Text(turn.text)
                } else {
                    TurnEnd::ToolCalls(calls)
                });
            };

            let recovery = turn.recovery();
            if recovery == Recovery::Fatal {
                return Err(err.into());
            }
            if turn.retries >= retry.max_retries {
                return Err(poly_ai::Error::RetriesExhausted {
                    retries: turn.retries,
                    source: Box::new(err),
                }
                .into());
            }
            if recovery == Recovery::Replay {
                turn.reset_buffers();
            }

            turn.retries += 1;
            let delay = retry.delay_for_retry(turn.retries);
            tracing::warn!(
                "Stream failed (retry {}/{}, {:?}): {}. Retrying in {:?}...",
                turn.retries,
                retry.max_retries,
                recovery,
                err,
                delay
            );
            cancellable_sleep(delay, cancel).await?;
        }
    }

    /// Drain one stream through the pump queues. Returns the stream error, if any.
    async fn consume(
        &self,
        stream: poly_ai::DeltaStream,
        turn: &mut StreamTurn,
        cancel: &CancellationToken,
    ) -> Result<Option<poly_ai::Error>> {
        let (pump, mut queues) = spawn_pump(stream);
        let mut failure = None;
        let (mut text_open, mut reasoning_open, mut fragments_open, mut errors_open) =
            (true, true, true, true);

        while text_open || reasoning_open || fragments_open || errors_open {
            tokio::select! {
                _ = cancel.cancelled() => {
                    pump.abort();
                    return Err(Error::Cancelled);
                }
                item = queues.text.recv(), if text_open => match item {
                    Some(delta) => {
                        let _ = self.event_tx.send(AgentEvent::TextDelta { delta });
                    }
                    None => text_open = false,
                },
                item = queues.reasoning.recv(), if reasoning_open => match item {
                    Some(delta) => {
                        let _ = self.event_tx.send(AgentEvent::ReasoningDelta { delta });
                    }
                    None => reasoning_open = false,
                },
                item = queues.fragments.recv(), if fragments_open => match item {
                    Some(fragment) => {
                        turn.saw_tool_fragments = true;
                        turn.accumulator.push(fragment)?;
                    }
                    None => fragments_open = false,
                },
                item = queues.errors.recv(), if errors_open => match item {
                    Some(err) => failure = Some(err),
                    None => errors_open = false,
                },
            }
        }

        let output = pump
            .await
            .map_err(|e| Error::Other(format!("stream task failed: {}", e)))?;
        turn.absorb(output);
        Ok(failure)
    }

    /// Run each call in order; failures become result text.
    async fn execute_tool_calls(
        &self,
        calls: &[poly_ai::SealedToolCall],
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let arguments = call.parse_arguments();
            let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: arguments
                    .as_ref()
                    .map(|a| serde_json::Value::Object(a.clone()))
                    .unwrap_or(serde_json::Value::Null),
            });

            let outcome = match arguments {
                Ok(arguments) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        out = self.registry.call(&call.name, arguments, cancel.clone()) => out,
                    }
                }
                Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
            };

            if matches!(outcome, Err(ToolError::Cancelled)) && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let (text, is_error) = match outcome {
                Ok(text) => (text, false),
                Err(e) => (format!("Error: tool '{}' failed: {}", call.name, e), true),
            };

            let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: text.clone(),
                is_error,
            });
            results.push(Message::tool_result(&call.id, &call.name, text));
        }

        Ok(results)
    }
}
