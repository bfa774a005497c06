use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::auth::authenticate;
use crate::error::ApiError;

#[derive(Deserialize, Default)]
pub struct IssuePreauthBody {
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[derive(Serialize)]
pub struct PreauthReply {
    pub token: String,
}

/// POST /bots/{bot}/preauth_keys — a short-lived token scoped to the bot's
/// owner, for handing to tool hosts and other bot-side collaborators.
pub async fn issue_preauth_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<IssuePreauthBody>,
) -> Result<(StatusCode, Json<PreauthReply>), ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    let bot = state.directory.authorize(&actor.id, &bot_id, false)?;

    let ttl = body
        .ttl_seconds
        .filter(|t| *t > 0)
        .unwrap_or(state.config.auth.token_ttl_secs);
    let token = state.tokens.mint(&bot.owner_user_id, ttl);
    info!(bot_id = %bot.id, ttl, "preauth key issued");

    Ok((StatusCode::CREATED, Json(PreauthReply { token })))
}
