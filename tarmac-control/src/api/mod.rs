//! API Module
//!
//! HTTP API layer of the control plane.
//! Each submodule handles endpoints for a specific domain.

pub mod app;
pub mod caller;
pub mod deploy;
pub mod error;
pub mod health;
pub mod role;
pub mod user;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tarmac_core::domain::image::ImageNaming;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthScheme, TokenAuthScheme};
use crate::provision::Provisioner;
use crate::repository::Repositories;
use crate::service::app::AppService;
use crate::service::role::RoleService;
use crate::service::user::UserService;
use crate::service::{DeployDispatcher, EventService, PermissionEngine};

/// Largest accepted deploy upload
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<dyn AuthScheme>,
    pub permissions: Arc<PermissionEngine>,
    pub events: Arc<EventService>,
    pub dispatcher: Arc<DeployDispatcher>,
    pub apps: Arc<AppService>,
    pub users: Arc<UserService>,
    pub roles: Arc<RoleService>,
}

impl AppState {
    /// Wires every service over `repos`
    pub fn new(
        repos: &Repositories,
        provisioner: Arc<dyn Provisioner>,
        naming: ImageNaming,
        internal_app: &str,
    ) -> Self {
        let auth: Arc<dyn AuthScheme> = Arc::new(TokenAuthScheme::new(repos, internal_app));
        let permissions = Arc::new(PermissionEngine::new(repos));
        let events = Arc::new(EventService::new(repos, naming));

        Self {
            dispatcher: Arc::new(DeployDispatcher::new(repos, events.clone(), provisioner)),
            apps: Arc::new(AppService::new(repos, auth.clone())),
            users: Arc::new(UserService::new(repos, permissions.clone(), auth.clone())),
            roles: Arc::new(RoleService::new(permissions.clone())),
            auth,
            permissions,
            events,
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // App endpoints
        .route("/apps", post(app::create_app))
        .route("/apps/{app}/tokens", post(app::create_app_token))
        // Deploy endpoints
        .route(
            "/apps/{app}/deploy",
            post(deploy::deploy).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/apps/{app}/deploy/rollback", post(deploy::rollback))
        .route("/apps/{app}/diff", post(deploy::save_diff))
        .route("/deploys", get(deploy::list_deploys))
        .route("/deploys/{id}", get(deploy::get_deploy))
        // User and role endpoints
        .route("/users", post(user::create_user))
        .route("/roles", post(role::create_role))
        .route("/roles/{name}/permissions", post(role::add_permissions))
        .route(
            "/roles/{name}/users",
            post(role::assign_role).delete(role::dissociate_role),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
