use thiserror::Error;

/// Gateway transport errors. Everything here maps to the Transport slot of
/// the shared taxonomy except `Cancelled`, which callers treat as a clean
/// shutdown rather than a failure.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Gateway protocol error: {0}")]
    Protocol(String),

    #[error("SSE line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
