//! Deploy API Handlers
//!
//! HTTP endpoints for deploys, rollbacks, diffs and deploy history.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tarmac_core::domain::deploy::{DeployData, DeployFile};
use tarmac_core::dto::deploy::{
    DeployRequest, DeployResponse, DiffRequest, ListDeploysQuery, RollbackRequest,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::auth::Caller;
use crate::service::DeployOutcome;
use crate::service::event::DeployScope;

// =============================================================================
// Deploy Endpoints
// =============================================================================

/// POST /apps/{app}/deploy
/// Multipart form with `archive-url`, `image`, `commit`, `user`, `origin`,
/// `build`, `message` and an optional `file`
pub async fn deploy(
    State(state): State<AppState>,
    Path(app): Path<String>,
    caller: Caller,
    multipart: Multipart,
) -> ApiResult<Json<DeployResponse>> {
    let (request, file) = read_deploy_form(multipart).await?;
    tracing::info!("Deploy of {} requested by {}", app, caller.principal.name());

    let outcome = state.dispatcher.deploy(&app, request, file, &caller).await?;
    Ok(Json(response(outcome)))
}

/// POST /apps/{app}/deploy/rollback
pub async fn rollback(
    State(state): State<AppState>,
    Path(app): Path<String>,
    caller: Caller,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<Json<DeployResponse>> {
    tracing::info!(
        "Rollback of {} to {:?} requested by {}",
        app,
        req.image,
        caller.principal.name()
    );

    let outcome = state.dispatcher.rollback(&app, req, &caller).await?;
    Ok(Json(response(outcome)))
}

/// POST /apps/{app}/diff
/// Attaches a diff to the running deploy
pub async fn save_diff(
    State(state): State<AppState>,
    Path(app): Path<String>,
    caller: Caller,
    Json(req): Json<DiffRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let event_id = state.dispatcher.save_diff(&app, &req.diff, &caller).await?;
    Ok(Json(serde_json::json!({ "event_id": event_id })))
}

// =============================================================================
// Deploy History Endpoints
// =============================================================================

/// GET /deploys?app=&limit=
/// Deploys visible to the caller, newest first; 204 when there are none
pub async fn list_deploys(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListDeploysQuery>,
) -> ApiResult<Response> {
    let scope = DeployScope {
        app: query.app.filter(|a| !a.is_empty()),
        limit: query.limit,
    };
    let deploys = state
        .events
        .list_deploys(&scope, &caller.permissions)
        .await?;

    if deploys.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(deploys).into_response())
}

/// GET /deploys/{id}
pub async fn get_deploy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    caller: Caller,
) -> ApiResult<Json<DeployData>> {
    tracing::debug!("Getting deploy: {}", id);

    let deploy = state.events.get_deploy(id, &caller.permissions).await?;
    Ok(Json(deploy))
}

// =============================================================================
// Helper Functions
// =============================================================================

fn response(outcome: DeployOutcome) -> DeployResponse {
    DeployResponse {
        event_id: outcome.event_id,
        image: outcome.image,
    }
}

async fn read_deploy_form(
    mut multipart: Multipart,
) -> ApiResult<(DeployRequest, Option<DeployFile>)> {
    let mut request = DeployRequest::default();
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let file_name = field.file_name().unwrap_or("archive.tar.gz").to_string();
            let content = field.bytes().await.map_err(bad_form)?;
            file = Some(DeployFile::new(file_name, content.to_vec()));
            continue;
        }

        let value = field.text().await.map_err(bad_form)?;
        match name.as_str() {
            "archive-url" => request.archive_url = value,
            "image" => request.image = value,
            "commit" => request.commit = value,
            "user" => request.user = value,
            "origin" => request.origin = value,
            "message" => request.message = value,
            "build" => request.build = parse_bool(&value),
            other => tracing::debug!("Ignoring deploy form field {:?}", other),
        }
    }

    Ok((request, file))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn bad_form(err: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("invalid deploy form: {}", err.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" 1 "));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
