use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::authenticate;
use crate::error::ApiError;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    /// RFC3339 upper bound (exclusive); pages backwards from the newest.
    pub before: Option<String>,
}

/// GET /bots/{bot}/messages?limit&before — ascending by created_at.
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, true)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let before = match &query.before {
        Some(raw) => Some(
            raw.parse::<DateTime<Utc>>()
                .map_err(|_| ApiError::validation("before must be an RFC3339 timestamp"))?,
        ),
        None => None,
    };

    let messages = state.conversations.list_messages(&bot_id, limit, before)?;
    Ok(Json(json!({"messages": messages})))
}

/// DELETE /bots/{bot}/messages — bulk clear, owner/admin only.
///
/// 204 means the deletion is committed: the next GET observes an empty
/// list.
pub async fn clear_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, false)?;

    state.conversations.clear_messages(&bot_id)?;
    Ok(StatusCode::NO_CONTENT)
}
