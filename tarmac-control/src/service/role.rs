//! Role Service
//!
//! Caller-facing role management. Authorization happens here; the role
//! mechanics live in [`PermissionEngine`].

use std::sync::Arc;

use tarmac_core::domain::permission::{Context, Role, Scheme};
use tarmac_core::dto::role::{AddPermissions, CreateRole, RoleAssignment};

use crate::auth::Caller;
use crate::service::error::ControlError;
use crate::service::permission::PermissionEngine;

pub struct RoleService {
    engine: Arc<PermissionEngine>,
}

impl RoleService {
    pub fn new(engine: Arc<PermissionEngine>) -> Self {
        Self { engine }
    }

    pub async fn create(&self, req: CreateRole, caller: &Caller) -> Result<Role, ControlError> {
        PermissionEngine::authorize(&caller.permissions, Scheme::ROLE_CREATE, &[Context::global()])?;
        self.engine
            .create_role(&req.name, req.context_type, &req.description)
            .await
    }

    pub async fn add_permissions(
        &self,
        role: &str,
        req: AddPermissions,
        caller: &Caller,
    ) -> Result<Role, ControlError> {
        PermissionEngine::authorize(&caller.permissions, Scheme::ROLE_UPDATE, &[Context::global()])?;
        self.engine.add_permissions(role, &req.schemes).await
    }

    /// Assigns `role` to a user. The caller needs `role.update.assign` on
    /// the context the assignment grants.
    pub async fn assign(
        &self,
        role: &str,
        req: RoleAssignment,
        caller: &Caller,
    ) -> Result<(), ControlError> {
        self.authorize_assignment(role, &req, caller).await?;
        self.engine
            .assign_role(&req.email, role, &req.context_value)
            .await
    }

    pub async fn dissociate(
        &self,
        role: &str,
        req: RoleAssignment,
        caller: &Caller,
    ) -> Result<(), ControlError> {
        self.authorize_assignment(role, &req, caller).await?;
        self.engine
            .dissociate_role(&req.email, role, &req.context_value)
            .await
    }

    async fn authorize_assignment(
        &self,
        role: &str,
        req: &RoleAssignment,
        caller: &Caller,
    ) -> Result<(), ControlError> {
        let found = self.engine.find_role(role).await?;
        let context = Context::new(found.context_type, &req.context_value);
        PermissionEngine::authorize(&caller.permissions, Scheme::ROLE_UPDATE_ASSIGN, &[context])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarmac_core::domain::permission::{ContextType, Permission, PermissionSet};
    use tarmac_core::domain::principal::{Principal, User};

    use crate::repository::Repositories;

    fn caller(permissions: Vec<Permission>) -> Caller {
        Caller {
            principal: Principal::User(User::new("lead@example.com")),
            permissions: PermissionSet::new(permissions),
        }
    }

    #[tokio::test]
    async fn test_assignment_scoped_to_context() {
        let repos = Repositories::in_memory();
        repos.users.insert(&User::new("dev@example.com")).await.unwrap();
        let roles = RoleService::new(Arc::new(PermissionEngine::new(&repos)));

        let admin = caller(vec![Permission::new(Scheme::ALL, Context::global())]);
        roles
            .create(
                CreateRole {
                    name: "team-deployer".to_string(),
                    context_type: ContextType::Team,
                    description: String::new(),
                },
                &admin,
            )
            .await
            .unwrap();

        let lead = caller(vec![Permission::new(
            Scheme::ROLE_UPDATE_ASSIGN,
            Context::team("ops"),
        )]);
        let assignment = |team: &str| RoleAssignment {
            email: "dev@example.com".to_string(),
            context_value: team.to_string(),
        };

        roles
            .assign("team-deployer", assignment("ops"), &lead)
            .await
            .unwrap();
        assert!(matches!(
            roles.assign("team-deployer", assignment("dev"), &lead).await,
            Err(ControlError::PermissionDenied)
        ));
        assert!(matches!(
            roles
                .create(
                    CreateRole {
                        name: "other".to_string(),
                        context_type: ContextType::App,
                        description: String::new(),
                    },
                    &lead,
                )
                .await,
            Err(ControlError::PermissionDenied)
        ));

        roles
            .dissociate("team-deployer", assignment("ops"), &lead)
            .await
            .unwrap();
        let user = repos.users.find("dev@example.com").await.unwrap().unwrap();
        assert!(user.roles.is_empty());
    }
}
