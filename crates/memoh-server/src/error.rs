//! Mapping from subsystem errors to HTTP responses.
//!
//! Every handler returns `Result<_, ApiError>`; the conversions below keep
//! the backend's error taxonomy visible to clients as stable `code` strings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({"error": self.message, "code": self.code}));
        (self.status, body).into_response()
    }
}

impl From<memoh_users::UserError> for ApiError {
    fn from(e: memoh_users::UserError) -> Self {
        use memoh_users::UserError::*;
        match &e {
            NotFound(_) | BotNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
            }
            PermissionDenied(_) => {
                Self::new(StatusCode::FORBIDDEN, "PERMISSION_DENIED", e.to_string())
            }
            AlreadyExists(_) => Self::new(StatusCode::CONFLICT, "CONFLICT", e.to_string()),
            InvalidInput(_) => Self::validation(e.to_string()),
            PasswordHash(_) | DatabaseError(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<memoh_identity::IdentityError> for ApiError {
    fn from(e: memoh_identity::IdentityError) -> Self {
        use memoh_identity::IdentityError::*;
        match &e {
            NotFound(_) | CodeNotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
            }
            CodeUsed => Self::new(StatusCode::CONFLICT, "CODE_USED", e.to_string()),
            CodeExpired => Self::new(StatusCode::CONFLICT, "CODE_EXPIRED", e.to_string()),
            CodeMismatch => Self::new(StatusCode::CONFLICT, "CODE_MISMATCH", e.to_string()),
            LinkConflict { .. } => Self::new(StatusCode::CONFLICT, "LINK_CONFLICT", e.to_string()),
            InvalidInput(_) => Self::validation(e.to_string()),
            DatabaseError(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<memoh_conversations::ConversationError> for ApiError {
    fn from(e: memoh_conversations::ConversationError) -> Self {
        use memoh_conversations::ConversationError::*;
        match &e {
            NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
            NotParticipant(_) | PermissionDenied(_) => {
                Self::new(StatusCode::FORBIDDEN, "PERMISSION_DENIED", e.to_string())
            }
            InvalidInput(_) => Self::validation(e.to_string()),
            Serialization(_) | DatabaseError(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<memoh_chat::ChatError> for ApiError {
    fn from(e: memoh_chat::ChatError) -> Self {
        use memoh_chat::ChatError::*;
        match &e {
            Validation(_) => Self::validation(e.to_string()),
            NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
            Config(_) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "CONFIG_ERROR", e.to_string()),
            Transport(_) => Self::new(StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", e.to_string()),
            Directory(inner) => {
                // Re-route so bot-not-found stays a 404, not a 500.
                Self::from(clone_user_error(inner, &e))
            }
            History(_) | Internal(_) => Self::internal(e.to_string()),
        }
    }
}

// UserError is not Clone; rebuild the variant we care about for mapping.
fn clone_user_error(
    inner: &memoh_users::UserError,
    outer: &memoh_chat::ChatError,
) -> memoh_users::UserError {
    use memoh_users::UserError::*;
    match inner {
        NotFound(s) => NotFound(s.clone()),
        BotNotFound(s) => BotNotFound(s.clone()),
        AlreadyExists(s) => AlreadyExists(s.clone()),
        PermissionDenied(s) => PermissionDenied(s.clone()),
        InvalidInput(s) => InvalidInput(s.clone()),
        _ => InvalidInput(outer.to_string()),
    }
}

impl From<memoh_scheduler::SchedulerError> for ApiError {
    fn from(e: memoh_scheduler::SchedulerError) -> Self {
        use memoh_scheduler::SchedulerError::*;
        match &e {
            InvalidPattern { .. } => Self::validation(e.to_string()),
            NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
            Disabled(_) => Self::new(StatusCode::CONFLICT, "SCHEDULE_DISABLED", e.to_string()),
            OwnerMissing(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "OWNER_MISSING", e.to_string())
            }
            Directory(_) | TokenMint(_) | Trigger(_) | DatabaseError(_) => {
                Self::internal(e.to_string())
            }
        }
    }
}

impl From<memoh_channels::ChannelError> for ApiError {
    fn from(e: memoh_channels::ChannelError) -> Self {
        use memoh_channels::ChannelError::*;
        match e {
            BotNotFound(b) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Bot not found: {b}"),
            ),
            Identity(inner) => Self::from(inner),
            Conversation(inner) => Self::from(inner),
            Directory(inner) => Self::from(inner),
            Chat(inner) => Self::from(inner),
            other => Self::internal(other.to_string()),
        }
    }
}
