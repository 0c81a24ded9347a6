//! Error types for poly-ai

use std::time::Duration;

use thiserror::Error;

/// Result type alias using poly-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the upstream chat API
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level failure (connect, reset, DNS, body read)
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// No response headers within the per-attempt timeout
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The first attempt and `retries` further ones all failed; `source` is the last error
    #[error("after {retries} retries: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<Error>,
    },

    /// The byte stream failed mid-turn
    #[error("stream failed: {message}")]
    Stream {
        message: String,
        /// Whether any delta of this turn was already surfaced to the caller
        committed: bool,
    },

    /// Tool-call arguments could not be turned into an argument map
    #[error("invalid tool arguments: {0}")]
    ToolArguments(String),

    /// Arguments were inspected before the end of the stream
    #[error("tool calls are not sealed yet")]
    NotSealed,

    /// A fragment arrived after the accumulator was sealed
    #[error("tool calls already sealed")]
    AlreadySealed,

    /// The request cannot be sent (e.g. a non-replayable body)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or missing API key
    #[error("invalid or missing API key")]
    InvalidApiKey,

    /// The caller's cancellation token fired
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the transport (or the loop, for stream failures) may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Timeout(_) | Error::Stream { .. }
        )
    }

    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::RetriesExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::RetriesExhausted { source, .. } => source.status(),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_variants() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            Error::Stream {
                message: "reset".into(),
                committed: false
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_not_retryable() {
        assert!(
            !Error::Upstream {
                status: 401,
                body: "nope".into()
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::NotSealed.is_retryable());
        assert!(!Error::InvalidApiKey.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let e = Error::RetriesExhausted {
            retries: 3,
            source: Box::new(Error::Upstream {
                status: 503,
                body: "busy".into(),
            }),
        };
        assert_eq!(e.to_string(), "after 3 retries: upstream returned 503: busy");
        assert_eq!(e.status(), Some(503));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(
            !Error::Upstream {
                status: 500,
                body: String::new()
            }
            .is_cancelled()
        );
    }
}
