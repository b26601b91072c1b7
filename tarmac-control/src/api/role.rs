//! Role API Handlers
//!
//! HTTP endpoints for role management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tarmac_core::domain::permission::Role;
use tarmac_core::dto::role::{AddPermissions, CreateRole, RoleAssignment};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::auth::Caller;

/// POST /roles
pub async fn create_role(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateRole>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    tracing::info!("Creating role: {}", req.name);

    let role = state.roles.create(req, &caller).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// POST /roles/{name}/permissions
pub async fn add_permissions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    caller: Caller,
    Json(req): Json<AddPermissions>,
) -> ApiResult<Json<Role>> {
    let role = state.roles.add_permissions(&name, req, &caller).await?;
    Ok(Json(role))
}

/// POST /roles/{name}/users
pub async fn assign_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    caller: Caller,
    Json(req): Json<RoleAssignment>,
) -> ApiResult<StatusCode> {
    state.roles.assign(&name, req, &caller).await?;
    Ok(StatusCode::OK)
}

/// DELETE /roles/{name}/users
pub async fn dissociate_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    caller: Caller,
    Json(req): Json<RoleAssignment>,
) -> ApiResult<StatusCode> {
    state.roles.dissociate(&name, req, &caller).await?;
    Ok(StatusCode::OK)
}
