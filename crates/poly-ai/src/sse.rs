//! Server-sent-event decoding for chat-completion streams

use std::fmt::Display;
use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// One piece of a tool call as it appears in a single frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Position of the call within the assistant message
    pub index: Option<usize>,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Partial JSON argument text
    pub arguments: Option<String>,
}

/// Incremental model output carried by one `data:` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

impl Delta {
    /// Create a text-only delta
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    /// Create a reasoning-only delta
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Default::default()
        }
    }

    /// Create a delta carrying a single tool-call fragment
    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Default::default()
        }
    }

    /// Whether the frame carried nothing we care about (e.g. a role-only chunk)
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.tool_calls.is_empty()
    }
}

/// Items produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(Delta),
    /// End of turn: `[DONE]` or a clean EOF
    Done,
}

/// A decoded delta stream
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Result of interpreting one line
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Delta(Delta),
    Done,
}

/// Splits raw bytes into lines. Bytes are held until a newline arrives, so
/// multi-byte characters split across reads are reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Take the final unterminated line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Interpret a single SSE line.
///
/// Returns `None` for blank lines, comments, non-data fields, malformed JSON
/// and frames that carry no output.
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(Frame::Done);
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Skipping malformed frame ({}): {}", e, data);
            return None;
        }
    };

    let choice = chunk.choices.into_iter().next()?;
    let delta = choice.delta;
    let tool_calls = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallFragment {
                index: tc.index,
                id: tc.id.filter(|id| !id.is_empty()),
                name: name.filter(|n| !n.is_empty()),
                arguments,
            }
        })
        .collect();

    let out = Delta {
        content: delta.content.filter(|s| !s.is_empty()),
        reasoning: delta.reasoning_content.filter(|s| !s.is_empty()),
        tool_calls,
    };
    if out.is_empty() {
        None
    } else {
        Some(Frame::Delta(out))
    }
}

/// Decode a raw byte stream into deltas.
///
/// A read error ends the stream with `Error::Stream`, flagged `committed` when
/// a delta had already been yielded.
pub fn decode<S, B, E>(bytes: S) -> DeltaStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(stream! {
        let mut bytes = Box::pin(bytes);
        let mut lines = LineBuffer::new();
        let mut committed = false;

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(Error::Stream { message: e.to_string(), committed });
                    return;
                }
            };
            for line in lines.push(chunk.as_ref()) {
                match parse_line(&line) {
                    Some(Frame::Done) => {
                        yield Ok(StreamEvent::Done);
                        return;
                    }
                    Some(Frame::Delta(delta)) => {
                        committed = true;
                        yield Ok(StreamEvent::Delta(delta));
                    }
                    None => {}
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(Frame::Delta(delta)) = parse_line(&line) {
                yield Ok(StreamEvent::Delta(delta));
            }
        }
        yield Ok(StreamEvent::Done);
    })
}

// Wire types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    type Chunk = std::result::Result<Vec<u8>, std::io::Error>;

    fn chunks(parts: &[&[u8]]) -> Vec<Chunk> {
        parts.iter().map(|p| Ok(p.to_vec())).collect()
    }

    async fn collect(input: Vec<Chunk>) -> Vec<Result<StreamEvent>> {
        decode(stream::iter(input)).collect().await
    }

    fn text_frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[test]
    fn test_parse_line_ignores_non_data() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line("id: 7"), None);
        assert_eq!(parse_line("retry: 1000"), None);
        assert_eq!(parse_line("data: [DONE]"), Some(Frame::Done));
        assert_eq!(parse_line("  data: [DONE]  \r"), Some(Frame::Done));
    }

    #[test]
    fn test_parse_line_extracts_all_parts() {
        let line = r#"data: {"choices":[{"delta":{"content":"hi","reasoning_content":"hmm","tool_calls":[{"index":0,"id":"call_1","function":{"name":"glob","arguments":"{\"pat"}}]}}]}"#;
        let Some(Frame::Delta(delta)) = parse_line(line) else {
            panic!("expected delta");
        };
        assert_eq!(delta.content.as_deref(), Some("hi"));
        assert_eq!(delta.reasoning.as_deref(), Some("hmm"));
        assert_eq!(
            delta.tool_calls,
            vec![ToolCallFragment {
                index: Some(0),
                id: Some("call_1".into()),
                name: Some("glob".into()),
                arguments: Some("{\"pat".into()),
            }]
        );
    }

    #[test]
    fn test_role_only_chunk_is_skipped() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_line(line), None);
        assert_eq!(parse_line(r#"data: {"choices":[]}"#), None);
    }

    #[test]
    fn test_line_buffer_reassembles_utf8() {
        let text = "héllo wörld\n";
        let bytes = text.as_bytes();
        let mut buf = LineBuffer::new();
        // Split inside the two-byte 'é'
        assert!(buf.push(&bytes[..2]).is_empty());
        let lines = buf.push(&bytes[2..]);
        assert_eq!(lines, vec!["héllo wörld".to_string()]);
        assert_eq!(buf.finish(), None);
    }

    #[tokio::test]
    async fn test_frames_split_at_every_offset() {
        let body = format!("{}{}data: [DONE]\n\n", text_frame("Hel"), text_frame("lo ✓"));
        let bytes = body.as_bytes();
        for split in 1..bytes.len() {
            let events = collect(chunks(&[&bytes[..split], &bytes[split..]])).await;
            let text: String = events
                .iter()
                .filter_map(|e| match e {
                    Ok(StreamEvent::Delta(d)) => d.content.clone(),
                    _ => None,
                })
                .collect();
            assert_eq!(text, "Hello ✓", "split at {}", split);
            assert!(matches!(events.last(), Some(Ok(StreamEvent::Done))));
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_skipped() {
        let body = format!("data: {{not json\n\n{}data: [DONE]\n", text_frame("ok"));
        let events = collect(chunks(&[body.as_bytes()])).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::Delta(d)) if d.content.as_deref() == Some("ok")));
    }

    #[tokio::test]
    async fn test_done_stops_reading() {
        let body = format!("data: [DONE]\n\n{}", text_frame("late"));
        let events = collect(chunks(&[body.as_bytes()])).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_eof_flushes_unterminated_line() {
        let body = r#"data: {"choices":[{"delta":{"content":"tail"}}]}"#;
        let events = collect(chunks(&[body.as_bytes()])).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::Delta(d)) if d.content.as_deref() == Some("tail")));
        assert!(matches!(events[1], Ok(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_read_error_before_any_delta_is_uncommitted() {
        let input: Vec<Chunk> = vec![
            Ok(b": ping\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ];
        let events = collect(input).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Err(Error::Stream { message, committed }) => {
                assert!(message.contains("connection reset"));
                assert!(!committed);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_error_after_delta_is_committed() {
        let input: Vec<Chunk> = vec![
            Ok(text_frame("partial").into_bytes()),
            Err(std::io::Error::other("reset")),
        ];
        let events = collect(input).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            Err(Error::Stream { committed: true, .. })
        ));
    }
}
