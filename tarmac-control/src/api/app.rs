//! App API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tarmac_core::domain::app::App;
use tarmac_core::dto::app::{AppToken, CreateApp};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::auth::Caller;

/// POST /apps
pub async fn create_app(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateApp>,
) -> ApiResult<(StatusCode, Json<App>)> {
    tracing::info!("Creating app: {}", req.name);

    let app = state.apps.create_app(req, &caller).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

/// POST /apps/{app}/tokens
pub async fn create_app_token(
    State(state): State<AppState>,
    Path(app): Path<String>,
    caller: Caller,
) -> ApiResult<(StatusCode, Json<AppToken>)> {
    let token = state.apps.create_app_token(&app, &caller).await?;
    Ok((StatusCode::CREATED, Json(token)))
}
