use thiserror::Error;

/// Errors from the user/bot directory. Kept separate from the shared
/// taxonomy so the HTTP layer can map unknown-bot and insufficient-role
/// to distinct responses without string matching.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Bot not found: {0}")]
    BotNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Password hash error: {0}")]
    PasswordHash(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, UserError>;
