use thiserror::Error;

/// Identity-layer errors. The four bind-code conflicts are separate variants
/// (not one Conflict with a string) so callers can branch on them and the
/// HTTP layer can emit distinct codes.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Channel identity not found: {0}")]
    NotFound(String),

    #[error("Bind code not found")]
    CodeNotFound,

    #[error("Bind code already used")]
    CodeUsed,

    #[error("Bind code expired")]
    CodeExpired,

    #[error("Bind code platform mismatch")]
    CodeMismatch,

    /// The channel identity is already linked to a different user. The link
    /// is never silently rewritten; the code stays unused.
    #[error("Channel identity {identity_id} is already linked to another user")]
    LinkConflict { identity_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
