//! Authenticated principals

use serde::{Deserialize, Serialize};

use crate::domain::event::{Owner, OwnerType};
use crate::domain::permission::{Context, Permission, RoleInstance, Scheme};

/// A platform user and its role assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    /// Assignments in insertion order
    pub roles: Vec<RoleInstance>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            roles: Vec::new(),
        }
    }
}

/// Whoever a request was authenticated as
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    User(User),
    /// An application token. The internal application acts platform-wide.
    App { name: String, internal: bool },
}

impl Principal {
    pub fn name(&self) -> &str {
        match self {
            Principal::User(user) => &user.email,
            Principal::App { name, .. } => name,
        }
    }

    pub fn is_app_token(&self) -> bool {
        matches!(self, Principal::App { .. })
    }

    pub fn owner(&self) -> Owner {
        match self {
            Principal::User(user) => Owner::user(&user.email),
            Principal::App { name, internal } => Owner {
                owner_type: if *internal {
                    OwnerType::Internal
                } else {
                    OwnerType::App
                },
                name: name.clone(),
            },
        }
    }

    /// Fixed permission every principal holds regardless of roles
    pub fn self_permission(&self) -> Permission {
        match self {
            Principal::User(user) => Permission::new(Scheme::USER, Context::user(&user.email)),
            Principal::App { internal: true, .. } => {
                Permission::new(Scheme::ALL, Context::global())
            }
            Principal::App { name, .. } => Permission::new(Scheme::ALL, Context::app(name)),
        }
    }

    pub fn roles(&self) -> &[RoleInstance] {
        match self {
            Principal::User(user) => &user.roles,
            Principal::App { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_permissions() {
        let user = Principal::User(User::new("dev@example.com"));
        assert_eq!(
            user.self_permission(),
            Permission::new(Scheme::USER, Context::user("dev@example.com"))
        );

        let app = Principal::App {
            name: "g1".into(),
            internal: false,
        };
        assert_eq!(
            app.self_permission(),
            Permission::new(Scheme::ALL, Context::app("g1"))
        );

        let internal = Principal::App {
            name: "tarmac-dashboard".into(),
            internal: true,
        };
        assert_eq!(internal.self_permission().context, Context::global());
        assert_eq!(internal.owner().owner_type, OwnerType::Internal);
    }
}
