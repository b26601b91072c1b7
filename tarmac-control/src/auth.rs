//! Authentication
//!
//! The authentication strategy is a value built at start-up and injected
//! into the HTTP layer through [`AppState`](crate::api::AppState).

use std::sync::Arc;

use async_trait::async_trait;
use tarmac_core::domain::permission::PermissionSet;
use tarmac_core::domain::principal::Principal;
use uuid::Uuid;

use crate::repository::{Repositories, TokenRepository, TokenSubject, UserRepository};
use crate::service::error::ControlError;

/// An authenticated request's principal and its effective permissions,
/// computed once per request
#[derive(Debug, Clone)]
pub struct Caller {
    pub principal: Principal,
    pub permissions: PermissionSet,
}

/// Authentication strategy
#[async_trait]
pub trait AuthScheme: Send + Sync {
    /// Resolves a bearer token to a principal
    async fn authenticate(&self, token: &str) -> Result<Principal, ControlError>;

    /// Issues a fresh token for `subject`
    async fn issue_token(&self, subject: &TokenSubject) -> Result<String, ControlError>;

    /// Registers a caller-chosen token for `subject`
    async fn register_token(&self, token: &str, subject: &TokenSubject)
    -> Result<(), ControlError>;
}

/// Opaque tokens looked up in the token table
pub struct TokenAuthScheme {
    tokens: Arc<dyn TokenRepository>,
    users: Arc<dyn UserRepository>,
    /// App whose tokens act platform-wide
    internal_app: String,
}

impl TokenAuthScheme {
    pub fn new(repos: &Repositories, internal_app: impl Into<String>) -> Self {
        Self {
            tokens: repos.tokens.clone(),
            users: repos.users.clone(),
            internal_app: internal_app.into(),
        }
    }
}

#[async_trait]
impl AuthScheme for TokenAuthScheme {
    async fn authenticate(&self, token: &str) -> Result<Principal, ControlError> {
        let subject = self
            .tokens
            .find(token)
            .await?
            .ok_or_else(invalid_token)?;

        match subject {
            TokenSubject::User(email) => {
                let user = self.users.find(&email).await?.ok_or_else(invalid_token)?;
                Ok(Principal::User(user))
            }
            TokenSubject::App(name) => Ok(Principal::App {
                internal: name == self.internal_app,
                name,
            }),
        }
    }

    async fn issue_token(&self, subject: &TokenSubject) -> Result<String, ControlError> {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.tokens.insert(&token, subject).await?;
        tracing::info!("Token issued for {} {}", subject.kind(), subject.value());
        Ok(token)
    }

    async fn register_token(
        &self,
        token: &str,
        subject: &TokenSubject,
    ) -> Result<(), ControlError> {
        if token.len() < 16 {
            return Err(ControlError::Validation(
                "token must be at least 16 characters".to_string(),
            ));
        }
        self.tokens.insert(token, subject).await?;
        Ok(())
    }
}

fn invalid_token() -> ControlError {
    ControlError::Unauthorized("invalid token".to_string())
}

/// Extracts the token of an `Authorization: bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarmac_core::domain::principal::User;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("basic abc"), None);
        assert_eq!(bearer_token("bearer"), None);
    }

    #[tokio::test]
    async fn test_token_round_trip() {
        let repos = Repositories::in_memory();
        repos.users.insert(&User::new("dev@example.com")).await.unwrap();
        let auth = TokenAuthScheme::new(&repos, "tarmac-dashboard");

        let user_token = auth
            .issue_token(&TokenSubject::User("dev@example.com".into()))
            .await
            .unwrap();
        assert_eq!(
            auth.authenticate(&user_token).await.unwrap().name(),
            "dev@example.com"
        );

        let app_token = auth
            .issue_token(&TokenSubject::App("tarmac-dashboard".into()))
            .await
            .unwrap();
        assert_eq!(
            auth.authenticate(&app_token).await.unwrap(),
            Principal::App {
                name: "tarmac-dashboard".into(),
                internal: true
            }
        );

        assert!(matches!(
            auth.authenticate("nope").await,
            Err(ControlError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_token_of_deleted_user_is_rejected() {
        let repos = Repositories::in_memory();
        let auth = TokenAuthScheme::new(&repos, "tarmac-dashboard");
        auth.register_token(
            "0123456789abcdef",
            &TokenSubject::User("ghost@example.com".into()),
        )
        .await
        .unwrap();

        assert!(matches!(
            auth.authenticate("0123456789abcdef").await,
            Err(ControlError::Unauthorized(_))
        ));
    }
}
