use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginReply {
    pub token: String,
    pub user_id: String,
    pub role: String,
}

/// POST /auth/login — exchange credentials for a bearer token.
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginReply>, ApiError> {
    let user = state
        .directory
        .verify_credentials(&req.username, &req.password)
        .map_err(|_| ApiError::unauthorized("invalid credentials"))?;

    let token = state
        .tokens
        .mint(&user.id, state.config.auth.token_ttl_secs);
    info!(user_id = %user.id, "login");
    Ok(Json(LoginReply {
        token,
        user_id: user.id,
        role: user.role.to_string(),
    }))
}
