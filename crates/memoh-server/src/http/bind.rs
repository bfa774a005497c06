use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::auth::authenticate;
use crate::error::ApiError;

#[derive(Deserialize, Default)]
pub struct IssueBindCodeBody {
    /// Restrict the code to one platform (case-insensitive).
    #[serde(default)]
    pub platform: Option<String>,
    /// Lifetime in seconds; non-positive or absent falls back to 24 h.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[derive(Serialize)]
pub struct BindCodeReply {
    pub token: String,
    pub platform: Option<String>,
    pub expires_at: String,
}

/// POST /users/me/bind_codes — issue a one-time code that links a channel
/// identity to the calling user when consumed.
pub async fn issue_bind_code_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IssueBindCodeBody>,
) -> Result<(StatusCode, Json<BindCodeReply>), ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;

    let code = state.bind.issue(
        &actor.id,
        body.platform.as_deref(),
        body.ttl_seconds.unwrap_or(0),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(BindCodeReply {
            token: code.token,
            platform: code.platform,
            expires_at: code.expires_at,
        }),
    ))
}
