//! Transport abstraction for opening model streams

use async_trait::async_trait;
use poly_ai::{ChatClient, DeltaStream, Message, RetryConfig, Tool};
use tokio_util::sync::CancellationToken;

/// Something that can open a delta stream for a request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one streaming completion over `messages`
    async fn open(
        &self,
        messages: &[Message],
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> poly_ai::Result<DeltaStream>;

    /// Backoff policy for stream-level retries
    fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
    }
}

#[async_trait]
impl Transport for ChatClient {
    async fn open(
        &self,
        messages: &[Message],
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> poly_ai::Result<DeltaStream> {
        self.stream(messages, tools, cancel).await
    }

    fn retry_config(&self) -> RetryConfig {
        self.transport().retry_config().clone()
    }
}
