//! Repository Module
//!
//! Data access layer for the control plane.
//! Each repository trait covers one stored entity. Two backends implement
//! every trait with the same semantics: PostgreSQL for shared deployments
//! and an in-memory store for tests and single-process runs.

pub mod app;
pub mod event;
pub mod memory;
pub mod role;
pub mod token;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tarmac_core::domain::app::App;
use tarmac_core::domain::event::{Event, EventCompletion, Target};
use tarmac_core::domain::permission::{Role, RoleInstance};
use tarmac_core::domain::principal::User;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;

/// Errors produced by storage backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The running event of a target could not be observed after repeated
    /// conflicting inserts
    #[error("lock contention on {0}")]
    Contended(String),
}

/// Result of the atomic check-and-insert of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another event is already running for the target
    Locked(Uuid),
}

/// Result of a write that is only allowed while an event is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The event exists but was already finalized; nothing changed
    Finished,
    Missing,
}

/// Event listing filter. `None` fields do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub target_type: Option<String>,
    pub target_values: Option<Vec<String>>,
    /// Scheme name; matches the scheme and every scheme below it
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(target_type) = &self.target_type {
            if &event.target.target_type != target_type {
                return false;
            }
        }
        if let Some(values) = &self.target_values {
            if !values.contains(&event.target.value) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if !kind_matches(kind, &event.kind) {
                return false;
            }
        }
        true
    }
}

fn kind_matches(prefix: &str, kind: &str) -> bool {
    prefix.is_empty()
        || kind == prefix
        || (kind.starts_with(prefix) && kind.as_bytes().get(prefix.len()) == Some(&b'.'))
}

/// Storage contract for events (locks and audit history)
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Inserts `event` iff no running event exists for its target.
    ///
    /// The check and the insert are a single atomic step.
    async fn insert_if_idle(&self, event: &Event) -> Result<InsertOutcome, StoreError>;

    /// Appends text to the log of a running event
    async fn append_log(&self, id: Uuid, text: &str) -> Result<WriteOutcome, StoreError>;

    /// Finalizes a running event
    async fn finish(
        &self,
        id: Uuid,
        completion: &EventCompletion,
    ) -> Result<WriteOutcome, StoreError>;

    /// Merges data into the other custom data of a running event
    async fn merge_other_custom_data(
        &self,
        id: Uuid,
        data: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn find_running(&self, target: &Target) -> Result<Option<Event>, StoreError>;

    /// Events matching `filter`, newest first
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;
}

/// Storage contract for applications and their image history
#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<App>, StoreError>;

    /// Returns false when an app with the same name exists
    async fn insert(&self, app: &App) -> Result<bool, StoreError>;

    /// Apps owned by or shared with any of `teams`
    async fn list_for_teams(&self, teams: &[String]) -> Result<Vec<App>, StoreError>;

    async fn increment_deploys(&self, name: &str) -> Result<(), StoreError>;

    async fn append_image(&self, name: &str, image: &str) -> Result<(), StoreError>;

    /// Recorded images, oldest first
    async fn image_history(&self, name: &str) -> Result<Vec<String>, StoreError>;
}

/// Storage contract for roles
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<Role>, StoreError>;

    /// Returns false when a role with the same name exists
    async fn insert(&self, role: &Role) -> Result<bool, StoreError>;

    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Adds scheme names not yet on the role, keeping order. False if missing.
    async fn add_schemes(&self, name: &str, schemes: &[String]) -> Result<bool, StoreError>;

    /// Binds the role to a role event. False if missing.
    async fn add_event(&self, name: &str, event: &str) -> Result<bool, StoreError>;

    async fn list_by_event(&self, event: &str) -> Result<Vec<Role>, StoreError>;
}

/// Storage contract for users and their role assignments
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Returns false when the user exists
    async fn insert(&self, user: &User) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<User>, StoreError>;

    /// Removes a user with its role assignments. False if it was missing.
    async fn delete(&self, email: &str) -> Result<bool, StoreError>;

    /// Set-membership insert; an existing assignment keeps its position.
    /// False if the user is missing.
    async fn add_role(&self, email: &str, role: &RoleInstance) -> Result<bool, StoreError>;

    async fn remove_role(&self, email: &str, role: &RoleInstance) -> Result<bool, StoreError>;

    /// Drops every assignment of `role`; returns the number removed
    async fn remove_role_from_all(&self, role: &str) -> Result<u64, StoreError>;

    async fn list_with_role(&self, role: &str) -> Result<Vec<User>, StoreError>;
}

/// Whom a token authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSubject {
    User(String),
    App(String),
}

impl TokenSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            TokenSubject::User(_) => "user",
            TokenSubject::App(_) => "app",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            TokenSubject::User(v) | TokenSubject::App(v) => v,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Option<Self> {
        match kind {
            "user" => Some(TokenSubject::User(value)),
            "app" => Some(TokenSubject::App(value)),
            _ => None,
        }
    }
}

/// Storage contract for API tokens
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, token: &str, subject: &TokenSubject) -> Result<(), StoreError>;

    async fn find(&self, token: &str) -> Result<Option<TokenSubject>, StoreError>;
}

/// Every repository the services need, behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub events: Arc<dyn EventRepository>,
    pub apps: Arc<dyn AppRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<dyn TokenRepository>,
}

impl Repositories {
    /// All repositories backed by one in-memory store
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            events: store.clone(),
            apps: store.clone(),
            roles: store.clone(),
            users: store.clone(),
            tokens: store,
        }
    }

    /// All repositories backed by PostgreSQL
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            events: Arc::new(event::PgEventRepository::new(pool.clone())),
            apps: Arc::new(app::PgAppRepository::new(pool.clone())),
            roles: Arc::new(role::PgRoleRepository::new(pool.clone())),
            users: Arc::new(user::PgUserRepository::new(pool.clone())),
            tokens: Arc::new(token::PgTokenRepository::new(pool)),
        }
    }
}
