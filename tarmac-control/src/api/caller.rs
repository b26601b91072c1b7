//! Caller extraction
//!
//! Resolves the `Authorization: bearer <token>` header into a [`Caller`]
//! with its effective permissions, once per request.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::auth::{Caller, bearer_token};

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let principal = state.auth.authenticate(token).await?;
        let permissions = state.permissions.effective_permissions(&principal).await?;

        Ok(Caller {
            principal,
            permissions,
        })
    }
}
