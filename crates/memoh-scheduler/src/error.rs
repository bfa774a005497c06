use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Schedule not found: {0}")]
    NotFound(String),

    #[error("Schedule is disabled: {0}")]
    Disabled(String),

    #[error("Bot {0} has no owner user")]
    OwnerMissing(String),

    #[error("Token mint failed: {0}")]
    TokenMint(String),

    #[error("Trigger failed: {0}")]
    Trigger(#[from] memoh_chat::ChatError),

    #[error("Directory error: {0}")]
    Directory(#[from] memoh_users::UserError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
