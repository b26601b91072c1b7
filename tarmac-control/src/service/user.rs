//! User Service
//!
//! User creation and the start-up administrator.

use std::sync::Arc;

use tarmac_core::domain::permission::{Context, ContextType, RoleEvent, Scheme};
use tarmac_core::domain::principal::User;
use tarmac_core::dto::user::{CreateUser, CreatedUser};

use crate::auth::{AuthScheme, Caller};
use crate::repository::{Repositories, TokenSubject, UserRepository};
use crate::service::error::ControlError;
use crate::service::permission::PermissionEngine;

/// Role granted to the seeded administrator
pub const ADMIN_ROLE: &str = "admin";

pub struct UserService {
    users: Arc<dyn UserRepository>,
    permissions: Arc<PermissionEngine>,
    auth: Arc<dyn AuthScheme>,
}

impl UserService {
    pub fn new(
        repos: &Repositories,
        permissions: Arc<PermissionEngine>,
        auth: Arc<dyn AuthScheme>,
    ) -> Self {
        Self {
            users: repos.users.clone(),
            permissions,
            auth,
        }
    }

    /// Creates a user, assigns the roles bound to `user-create` and issues
    /// its first token
    pub async fn create_user(
        &self,
        req: CreateUser,
        caller: &Caller,
    ) -> Result<CreatedUser, ControlError> {
        PermissionEngine::authorize(&caller.permissions, Scheme::USER_CREATE, &[Context::global()])?;

        let email = req.email.trim().to_string();
        let user = self.insert_user(&email).await?;

        let token = match self.grant_initial_access(&user.email).await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!("Setting up user {} failed, removing it: {}", user.email, err);
                if let Err(delete_err) = self.users.delete(&user.email).await {
                    tracing::error!("Failed to remove user {}: {}", user.email, delete_err);
                }
                return Err(err);
            }
        };
        tracing::info!("User {} created by {}", user.email, caller.principal.name());

        Ok(CreatedUser {
            email: user.email,
            token,
        })
    }

    /// Ensures an administrator holding the root scheme globally, reachable
    /// with `token`. Safe to run on every start-up.
    pub async fn seed_admin(&self, email: &str, token: &str) -> Result<(), ControlError> {
        let created = self
            .permissions
            .create_role(ADMIN_ROLE, ContextType::Global, "platform administrator")
            .await;
        match created {
            Ok(_) | Err(ControlError::Conflict(_)) => {}
            Err(err) => return Err(err),
        }
        self.permissions
            .add_permissions(ADMIN_ROLE, &["*".to_string()])
            .await?;

        match self.insert_user(email).await {
            Ok(_) | Err(ControlError::Conflict(_)) => {}
            Err(err) => return Err(err),
        }
        self.permissions.assign_role(email, ADMIN_ROLE, "").await?;

        if self.auth.authenticate(token).await.is_err() {
            self.auth
                .register_token(token, &TokenSubject::User(email.to_string()))
                .await?;
        }

        tracing::info!("Administrator {} seeded", email);
        Ok(())
    }

    /// Assigns the `user-create` roles and issues the first token
    async fn grant_initial_access(&self, email: &str) -> Result<String, ControlError> {
        self.permissions
            .add_roles_for_event(email, RoleEvent::UserCreate, "")
            .await?;

        self.auth
            .issue_token(&TokenSubject::User(email.to_string()))
            .await
    }

    async fn insert_user(&self, email: &str) -> Result<User, ControlError> {
        if !is_valid_email(email) {
            return Err(ControlError::Validation(format!("invalid email: {:?}", email)));
        }

        let user = User::new(email);
        if !self.users.insert(&user).await? {
            return Err(ControlError::Conflict("User already exists.".to_string()));
        }
        Ok(user)
    }
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
