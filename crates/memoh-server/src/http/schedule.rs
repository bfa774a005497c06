use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use memoh_scheduler::Schedule;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::authenticate;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateScheduleBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pattern: String,
    pub command: String,
    #[serde(default)]
    pub max_calls: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateScheduleBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pattern: String,
    pub command: String,
    pub enabled: bool,
    #[serde(default)]
    pub max_calls: Option<i64>,
}

/// POST /bots/{bot}/schedule
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateScheduleBody>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, false)?;

    let schedule = state.scheduler.create(
        &bot_id,
        &body.name,
        &body.description,
        &body.pattern,
        &body.command,
        body.max_calls,
    )?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// GET /bots/{bot}/schedule
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, false)?;

    let schedules = state.scheduler.list_for_bot(&bot_id)?;
    Ok(Json(json!({"schedules": schedules})))
}

/// GET /bots/{bot}/schedule/{id}
pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path((bot_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Schedule>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, false)?;

    let schedule = load_bot_schedule(&state, &bot_id, &id)?;
    Ok(Json(schedule))
}

/// PUT /bots/{bot}/schedule/{id}
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path((bot_id, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<UpdateScheduleBody>,
) -> Result<Json<Schedule>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, false)?;
    load_bot_schedule(&state, &bot_id, &id)?;

    let updated = state.scheduler.update(
        &id,
        &body.name,
        &body.description,
        &body.pattern,
        &body.command,
        body.enabled,
        body.max_calls,
    )?;
    Ok(Json(updated))
}

/// DELETE /bots/{bot}/schedule/{id}
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path((bot_id, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, false)?;
    load_bot_schedule(&state, &bot_id, &id)?;

    state.scheduler.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// A schedule id is only valid under the bot that owns it.
fn load_bot_schedule(state: &AppState, bot_id: &str, id: &str) -> Result<Schedule, ApiError> {
    let schedule = state.scheduler.get(id)?;
    if schedule.bot_id != bot_id {
        return Err(ApiError::new(
            axum::http::StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Schedule not found: {id}"),
        ));
    }
    Ok(schedule)
}
