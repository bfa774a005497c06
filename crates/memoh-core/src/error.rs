use thiserror::Error;

/// Transport-agnostic error taxonomy shared across the backend.
///
/// Subsystem crates keep their own error enums; this is the shape they are
/// mapped into at the HTTP boundary so clients see a stable code regardless
/// of which layer failed.
#[derive(Debug, Error)]
pub enum MemohError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemohError {
    /// Short error code string sent to clients in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MemohError::Validation(_) => "VALIDATION_ERROR",
            MemohError::NotFound(_) => "NOT_FOUND",
            MemohError::PermissionDenied { .. } => "PERMISSION_DENIED",
            MemohError::Conflict(_) => "CONFLICT",
            MemohError::Config(_) => "CONFIG_ERROR",
            MemohError::Transport(_) => "TRANSPORT_ERROR",
            MemohError::Serialization(_) => "SERIALIZATION_ERROR",
            MemohError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemohError>;
