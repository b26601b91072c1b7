//! Permission domain types
//!
//! Schemes form a dotted tree (`app` > `app.deploy` > `app.deploy.git`);
//! a grant on a scheme covers every scheme below it. Contexts scope a grant
//! to the whole platform, a team, an application or a user.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A named permission requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scheme(&'static str);

impl Scheme {
    /// Root of the tree; covers every scheme
    pub const ALL: Scheme = Scheme("");

    pub const APP: Scheme = Scheme("app");
    pub const APP_CREATE: Scheme = Scheme("app.create");
    pub const APP_DEPLOY: Scheme = Scheme("app.deploy");
    pub const APP_DEPLOY_ARCHIVE_URL: Scheme = Scheme("app.deploy.archive-url");
    pub const APP_DEPLOY_BUILD: Scheme = Scheme("app.deploy.build");
    pub const APP_DEPLOY_GIT: Scheme = Scheme("app.deploy.git");
    pub const APP_DEPLOY_IMAGE: Scheme = Scheme("app.deploy.image");
    pub const APP_DEPLOY_ROLLBACK: Scheme = Scheme("app.deploy.rollback");
    pub const APP_DEPLOY_UPLOAD: Scheme = Scheme("app.deploy.upload");
    pub const APP_READ: Scheme = Scheme("app.read");
    pub const APP_READ_DEPLOY: Scheme = Scheme("app.read.deploy");
    pub const APP_READ_EVENTS: Scheme = Scheme("app.read.events");
    pub const APP_TOKEN: Scheme = Scheme("app.token");
    pub const APP_TOKEN_CREATE: Scheme = Scheme("app.token.create");
    pub const ROLE: Scheme = Scheme("role");
    pub const ROLE_CREATE: Scheme = Scheme("role.create");
    pub const ROLE_UPDATE: Scheme = Scheme("role.update");
    pub const ROLE_UPDATE_ASSIGN: Scheme = Scheme("role.update.assign");
    pub const USER: Scheme = Scheme("user");
    pub const USER_CREATE: Scheme = Scheme("user.create");

    /// Every scheme known to the platform
    pub const REGISTERED: &'static [Scheme] = &[
        Self::ALL,
        Self::APP,
        Self::APP_CREATE,
        Self::APP_DEPLOY,
        Self::APP_DEPLOY_ARCHIVE_URL,
        Self::APP_DEPLOY_BUILD,
        Self::APP_DEPLOY_GIT,
        Self::APP_DEPLOY_IMAGE,
        Self::APP_DEPLOY_ROLLBACK,
        Self::APP_DEPLOY_UPLOAD,
        Self::APP_READ,
        Self::APP_READ_DEPLOY,
        Self::APP_READ_EVENTS,
        Self::APP_TOKEN,
        Self::APP_TOKEN_CREATE,
        Self::ROLE,
        Self::ROLE_CREATE,
        Self::ROLE_UPDATE,
        Self::ROLE_UPDATE_ASSIGN,
        Self::USER,
        Self::USER_CREATE,
    ];

    pub fn name(&self) -> &'static str {
        self.0
    }

    /// Looks up a registered scheme. Only `*` names the root.
    pub fn parse(name: &str) -> Option<Scheme> {
        if name == "*" {
            return Some(Self::ALL);
        }
        Self::REGISTERED
            .iter()
            .copied()
            .find(|s| !s.0.is_empty() && s.0 == name)
    }

    pub fn parent(&self) -> Option<Scheme> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rsplit_once('.') {
            Some((parent, _)) => Scheme::parse(parent),
            None => Some(Self::ALL),
        }
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn is_ancestor_of(&self, other: Scheme) -> bool {
        self.is_ancestor_of_name(other.0)
    }

    pub fn is_ancestor_of_name(&self, other: &str) -> bool {
        self.0.is_empty()
            || self.0 == other
            || (other.starts_with(self.0) && other.as_bytes().get(self.0.len()) == Some(&b'.'))
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Serialize for Scheme {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Scheme {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Scheme::parse(&name).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown permission scheme: {}", name))
        })
    }
}

/// Scope level of a permission grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Global,
    Team,
    App,
    User,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Global => "global",
            ContextType::Team => "team",
            ContextType::App => "app",
            ContextType::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(ContextType::Global),
            "team" => Some(ContextType::Team),
            "app" => Some(ContextType::App),
            "user" => Some(ContextType::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A (type, value) pair scoping a grant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "type")]
    pub context_type: ContextType,
    pub value: String,
}

impl Context {
    pub fn new(context_type: ContextType, value: impl Into<String>) -> Self {
        let value = match context_type {
            ContextType::Global => String::new(),
            _ => value.into(),
        };
        Self {
            context_type,
            value,
        }
    }

    pub fn global() -> Self {
        Self::new(ContextType::Global, "")
    }

    pub fn team(name: impl Into<String>) -> Self {
        Self::new(ContextType::Team, name)
    }

    pub fn app(name: impl Into<String>) -> Self {
        Self::new(ContextType::App, name)
    }

    pub fn user(email: impl Into<String>) -> Self {
        Self::new(ContextType::User, email)
    }

    /// True when a grant scoped to `self` covers `required`.
    pub fn covers(&self, required: &Context) -> bool {
        self.context_type == ContextType::Global || self == required
    }
}

/// A scheme granted within a context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub scheme: Scheme,
    pub context: Context,
}

impl Permission {
    pub fn new(scheme: Scheme, context: Context) -> Self {
        Self { scheme, context }
    }
}

/// Lifecycle events roles can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleEvent {
    #[serde(rename = "user-create")]
    UserCreate,
    #[serde(rename = "team-create")]
    TeamCreate,
}

impl RoleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleEvent::UserCreate => "user-create",
            RoleEvent::TeamCreate => "team-create",
        }
    }

    /// Context type a role must have to be bound to this event
    pub fn context_type(&self) -> ContextType {
        match self {
            RoleEvent::UserCreate => ContextType::Global,
            RoleEvent::TeamCreate => ContextType::Team,
        }
    }
}

/// A named bundle of schemes instantiated per assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub context_type: ContextType,
    pub description: String,
    /// Registered scheme names, validated when added
    pub scheme_names: Vec<String>,
    /// Role events this role is assigned on
    pub events: Vec<String>,
}

impl Role {
    pub fn new(name: impl Into<String>, context_type: ContextType) -> Self {
        Self {
            name: name.into(),
            context_type,
            description: String::new(),
            scheme_names: Vec::new(),
            events: Vec::new(),
        }
    }

    /// The role's schemes instantiated at `context_value`.
    pub fn permissions_for(&self, context_value: &str) -> Vec<Permission> {
        let context = Context::new(self.context_type, context_value);
        self.scheme_names
            .iter()
            .filter_map(|name| Scheme::parse(name))
            .map(|scheme| Permission::new(scheme, context.clone()))
            .collect()
    }
}

/// An assignment of a role to a principal at a context value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleInstance {
    pub name: String,
    pub context_value: String,
}

impl RoleInstance {
    pub fn new(name: impl Into<String>, context_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_value: context_value.into(),
        }
    }
}

/// Effective permissions of one principal, computed once per request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub permissions: Vec<Permission>,
    /// Assigned roles that no longer exist; they contribute nothing
    pub unresolved_roles: Vec<String>,
}

impl PermissionSet {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self {
            permissions,
            unresolved_roles: Vec::new(),
        }
    }

    pub fn check(&self, scheme: Scheme, contexts: &[Context]) -> bool {
        check(&self.permissions, scheme, contexts)
    }

    /// Every context in which `scheme` is granted, without duplicates.
    pub fn contexts_for(&self, scheme: Scheme) -> Vec<Context> {
        let mut contexts: Vec<Context> = Vec::new();
        for permission in &self.permissions {
            if permission.scheme.is_ancestor_of(scheme) && !contexts.contains(&permission.context)
            {
                contexts.push(permission.context.clone());
            }
        }
        contexts
    }
}

/// True iff some permission's scheme is `scheme` or one of its ancestors
/// and its context is global or equal to one of `contexts`.
///
/// Callers pass every context the resource belongs to (an app and its
/// owning teams), which is how a team grant covers the team's apps.
pub fn check(permissions: &[Permission], scheme: Scheme, contexts: &[Context]) -> bool {
    permissions.iter().any(|p| {
        p.scheme.is_ancestor_of(scheme)
            && (p.context.context_type == ContextType::Global
                || contexts.iter().any(|c| p.context.covers(c)))
    })
}
