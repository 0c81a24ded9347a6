//! Error types for poly-agent

use thiserror::Error;

/// Result type alias using poly-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a run
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Ai(#[from] poly_ai::Error),

    /// The run was aborted through the agent handle
    #[error("cancelled")]
    Cancelled,

    /// The model kept requesting tools past the configured limit
    #[error("exceeded {0} tool rounds in one run")]
    TooManyToolRounds(u32),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Ai(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
