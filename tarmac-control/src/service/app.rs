//! App Service
//!
//! Application creation and application tokens.

use std::sync::Arc;

use tarmac_core::domain::app::{self, App};
use tarmac_core::domain::permission::{Context, Scheme};
use tarmac_core::dto::app::{AppToken, CreateApp};

use crate::auth::{AuthScheme, Caller};
use crate::repository::{AppRepository, Repositories, TokenSubject};
use crate::service::error::ControlError;
use crate::service::permission::PermissionEngine;

pub struct AppService {
    apps: Arc<dyn AppRepository>,
    auth: Arc<dyn AuthScheme>,
}

impl AppService {
    pub fn new(repos: &Repositories, auth: Arc<dyn AuthScheme>) -> Self {
        Self {
            apps: repos.apps.clone(),
            auth,
        }
    }

    /// Creates an application owned by `req.team_owner`
    pub async fn create_app(&self, req: CreateApp, caller: &Caller) -> Result<App, ControlError> {
        let team_owner = req.team_owner.trim();
        if team_owner.is_empty() {
            return Err(ControlError::Validation(
                "team_owner cannot be empty".to_string(),
            ));
        }
        PermissionEngine::authorize(
            &caller.permissions,
            Scheme::APP_CREATE,
            &[Context::team(team_owner)],
        )?;

        if !app::is_valid_app_name(&req.name) {
            return Err(ControlError::Validation(format!(
                "Invalid app name {:?}: use lowercase letters, digits and dashes, starting with a letter",
                req.name
            )));
        }

        let mut app = App::new(req.name, team_owner);
        app.platform = req.platform;
        for team in req.teams {
            if team != app.team_owner && !app.teams.contains(&team) {
                app.teams.push(team);
            }
        }

        if !self.apps.insert(&app).await? {
            return Err(ControlError::Conflict("App already exists.".to_string()));
        }

        tracing::info!(
            "App {} created for team {} by {}",
            app.name,
            app.team_owner,
            caller.principal.name()
        );
        Ok(app)
    }

    /// Issues a token acting as `app_name`
    pub async fn create_app_token(
        &self,
        app_name: &str,
        caller: &Caller,
    ) -> Result<AppToken, ControlError> {
        let app = self
            .apps
            .find(app_name)
            .await?
            .ok_or_else(|| ControlError::NotFound("App not found.".to_string()))?;
        PermissionEngine::authorize(&caller.permissions, Scheme::APP_TOKEN_CREATE, &app.contexts())?;

        let token = self
            .auth
            .issue_token(&TokenSubject::App(app.name.clone()))
            .await?;
        Ok(AppToken {
            app: app.name,
            token,
        })
    }
}
