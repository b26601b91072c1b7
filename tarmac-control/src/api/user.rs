//! User API Handlers

use axum::{Json, extract::State, http::StatusCode};
use tarmac_core::dto::user::{CreateUser, CreatedUser};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::auth::Caller;

/// POST /users
/// Creates a user and returns its first token
pub async fn create_user(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateUser>,
) -> ApiResult<(StatusCode, Json<CreatedUser>)> {
    let user = state.users.create_user(req, &caller).await?;
    Ok((StatusCode::CREATED, Json(user)))
}
