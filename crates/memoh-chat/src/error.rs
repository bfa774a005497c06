use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] memoh_agent::AgentError),

    #[error("History error: {0}")]
    History(#[from] memoh_history::HistoryError),

    #[error("Directory error: {0}")]
    Directory(#[from] memoh_users::UserError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// True when the error is the clean-cancellation signal rather than a
    /// failure; stream plumbing swallows it instead of reporting it.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(memoh_agent::AgentError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
