//! Streaming chat-completions client

use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    http::BackoffTransport,
    sse::{self, DeltaStream},
    types::{Message, Tool},
};

/// Default upstream endpoint
pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";
/// Default model id
pub const DEFAULT_MODEL: &str = "glm-4.5";

/// Chat-completions API client
#[derive(Debug, Clone)]
pub struct ChatClient {
    transport: BackoffTransport,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    thinking: bool,
}

impl ChatClient {
    /// Create a new client with an API key and default settings
    pub fn new(api_key: impl Into<String>, transport: BackoffTransport) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: Some(4096),
            temperature: Some(0.6),
            thinking: true,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Toggle the `thinking` request field
    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking = enabled;
        self
    }

    /// The model requests are sent to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The transport used for every request
    pub fn transport(&self) -> &BackoffTransport {
        &self.transport
    }

    /// Open a streaming completion for `messages`.
    ///
    /// Transient failures before the first byte are retried by the transport;
    /// the returned stream yields decoded deltas until `Done` or a stream error.
    pub async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<DeltaStream> {
        if self.api_key.is_empty() {
            return Err(Error::InvalidApiKey);
        }

        let body = self.build_request(messages, tools);
        let request = self
            .transport
            .client()
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .build()?;

        tracing::debug!(
            "Opening stream: model={} messages={} tools={}",
            self.model,
            messages.len(),
            tools.len()
        );
        let response = self.transport.execute(request, cancel).await?;
        Ok(sse::decode(response.bytes_stream().map_err(Error::from)))
    }

    fn build_request<'a>(&'a self, messages: &'a [Message], tools: &[Tool]) -> ChatRequest<'a> {
        let tools: Vec<ApiTool> = tools
            .iter()
            .map(|t| ApiTool {
                tool_type: "function",
                function: ApiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect();
        let has_tools = !tools.is_empty();

        ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tool_choice: has_tools.then_some("auto"),
            tools: has_tools.then_some(tools),
            thinking: self.thinking.then_some(Thinking { kind: "enabled" }),
        }
    }
}

// Request types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::StreamEvent;
    use futures::StreamExt;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ChatClient {
        ChatClient::new("test-key", BackoffTransport::new().unwrap())
            .with_base_url(format!("{}/v4/chat/completions", server.uri()))
    }

    #[test]
    fn test_request_body_defaults() {
        let client = ChatClient::new("k", BackoffTransport::new().unwrap());
        let messages = vec![Message::system("sys"), Message::user("hi")];
        let tools = vec![Tool::new("glob", "Find files", json!({"type": "object"}))];
        let body = serde_json::to_value(client.build_request(&messages, &tools)).unwrap();

        assert_eq!(body["model"], "glm-4.5");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["thinking"], json!({"type": "enabled"}));
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "glob");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
        let temperature = body["temperature"].as_f64().unwrap();
        assert!((temperature - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_request_without_tools_omits_tool_fields() {
        let client = ChatClient::new("k", BackoffTransport::new().unwrap()).with_thinking(false);
        let messages = vec![Message::user("hi")];
        let body = serde_json::to_value(client.build_request(&messages, &[])).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("thinking").is_none());
    }

    #[tokio::test]
    async fn test_stream_decodes_response() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v4/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stream = client(&server)
            .stream(&[Message::user("hi")], &[], &CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(StreamEvent::Delta(d)) if d.reasoning.as_deref() == Some("think")));
        assert!(matches!(&events[1], Ok(StreamEvent::Delta(d)) if d.content.as_deref() == Some("Hello")));
        assert!(matches!(events[2], Ok(StreamEvent::Done)));

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_empty_api_key_rejected() {
        let client = ChatClient::new("", BackoffTransport::new().unwrap());
        let err = client
            .stream(&[Message::user("hi")], &[], &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidApiKey));
    }
}
