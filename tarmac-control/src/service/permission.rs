//! Permission Service
//!
//! Computes effective permissions from a principal's self-permission and
//! role assignments, and manages roles and their assignments.

use std::collections::HashMap;
use std::sync::Arc;

use tarmac_core::domain::deploy::{self, DeployOptions};
use tarmac_core::domain::permission::{
    Context, ContextType, Permission, PermissionSet, Role, RoleEvent, RoleInstance, Scheme,
};
use tarmac_core::domain::principal::{Principal, User};

use crate::repository::{Repositories, RoleRepository, UserRepository};
use crate::service::error::ControlError;

/// Role lookups memoized for the duration of one computation
type RoleCache = HashMap<String, Option<Role>>;

pub struct PermissionEngine {
    roles: Arc<dyn RoleRepository>,
    users: Arc<dyn UserRepository>,
}

impl PermissionEngine {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            roles: repos.roles.clone(),
            users: repos.users.clone(),
        }
    }

    /// Self-permission plus every role's schemes instantiated at the
    /// assignment's context value.
    ///
    /// An assignment whose role no longer exists contributes nothing and is
    /// reported in `unresolved_roles`; resolution continues with the rest.
    pub async fn effective_permissions(
        &self,
        principal: &Principal,
    ) -> Result<PermissionSet, ControlError> {
        let mut cache = RoleCache::new();
        self.resolve(principal, &mut cache).await
    }

    async fn resolve(
        &self,
        principal: &Principal,
        cache: &mut RoleCache,
    ) -> Result<PermissionSet, ControlError> {
        let mut set = PermissionSet::new(vec![principal.self_permission()]);

        for instance in principal.roles() {
            let role = match cache.get(&instance.name) {
                Some(role) => role.clone(),
                None => {
                    let role = self.roles.find(&instance.name).await?;
                    cache.insert(instance.name.clone(), role.clone());
                    role
                }
            };

            match role {
                Some(role) => set
                    .permissions
                    .extend(role.permissions_for(&instance.context_value)),
                None => {
                    tracing::warn!(
                        "Role {} assigned to {} does not exist",
                        instance.name,
                        principal.name()
                    );
                    if !set.unresolved_roles.contains(&instance.name) {
                        set.unresolved_roles.push(instance.name.clone());
                    }
                }
            }
        }

        Ok(set)
    }

    pub fn check(set: &PermissionSet, scheme: Scheme, contexts: &[Context]) -> bool {
        set.check(scheme, contexts)
    }

    /// Like [`check`](Self::check) but as a `Result`
    pub fn authorize(
        set: &PermissionSet,
        scheme: Scheme,
        contexts: &[Context],
    ) -> Result<(), ControlError> {
        if set.check(scheme, contexts) {
            Ok(())
        } else {
            tracing::debug!("Permission {} denied on {:?}", scheme, contexts);
            Err(ControlError::PermissionDenied)
        }
    }

    /// Scheme a deploy requires: image, then file with build, then file,
    /// then commit, otherwise archive-url.
    pub fn scheme_for(options: &DeployOptions) -> Scheme {
        deploy::scheme_for(options)
    }

    pub fn contexts_for(set: &PermissionSet, scheme: Scheme) -> Vec<Context> {
        set.contexts_for(scheme)
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub async fn create_role(
        &self,
        name: &str,
        context_type: ContextType,
        description: &str,
    ) -> Result<Role, ControlError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControlError::Validation("role name cannot be empty".to_string()));
        }

        let mut role = Role::new(name, context_type);
        role.description = description.to_string();

        if !self.roles.insert(&role).await? {
            return Err(ControlError::Conflict("role already exists".to_string()));
        }

        tracing::info!("Role {} created with context {}", role.name, context_type);
        Ok(role)
    }

    pub async fn find_role(&self, name: &str) -> Result<Role, ControlError> {
        self.roles.find(name).await?.ok_or_else(role_not_found)
    }

    /// Deletes a role and every assignment of it
    pub async fn remove_role(&self, name: &str) -> Result<(), ControlError> {
        if !self.roles.delete(name).await? {
            return Err(role_not_found());
        }
        let removed = self.users.remove_role_from_all(name).await?;
        tracing::info!("Role {} removed along with {} assignments", name, removed);
        Ok(())
    }

    /// Adds registered schemes to a role, skipping ones it already has
    pub async fn add_permissions(
        &self,
        role: &str,
        schemes: &[String],
    ) -> Result<Role, ControlError> {
        let mut names: Vec<String> = Vec::new();
        for name in schemes {
            let scheme = Scheme::parse(name).ok_or_else(|| {
                ControlError::Validation(format!("invalid permission scheme: {}", name))
            })?;
            let canonical = scheme.to_string();
            if !names.contains(&canonical) {
                names.push(canonical);
            }
        }

        if !self.roles.add_schemes(role, &names).await? {
            return Err(role_not_found());
        }

        self.roles.find(role).await?.ok_or_else(role_not_found)
    }

    /// Binds a role to a role event. The role's context type must be the
    /// one the event assigns at.
    pub async fn add_role_event(&self, role: &str, event: RoleEvent) -> Result<(), ControlError> {
        let found = self.roles.find(role).await?.ok_or_else(role_not_found)?;
        if found.context_type != event.context_type() {
            return Err(ControlError::Validation(format!(
                "role with context {} cannot be bound to event {}",
                found.context_type,
                event.as_str()
            )));
        }
        self.roles.add_event(role, event.as_str()).await?;
        Ok(())
    }

    pub async fn assign_role(
        &self,
        email: &str,
        role: &str,
        context_value: &str,
    ) -> Result<(), ControlError> {
        self.roles.find(role).await?.ok_or_else(role_not_found)?;

        let instance = RoleInstance::new(role, context_value);
        if !self.users.add_role(email, &instance).await? {
            return Err(user_not_found());
        }

        tracing::info!("Role {}({}) assigned to {}", role, context_value, email);
        Ok(())
    }

    pub async fn dissociate_role(
        &self,
        email: &str,
        role: &str,
        context_value: &str,
    ) -> Result<(), ControlError> {
        let instance = RoleInstance::new(role, context_value);
        if !self.users.remove_role(email, &instance).await? {
            return Err(user_not_found());
        }

        tracing::info!("Role {}({}) dissociated from {}", role, context_value, email);
        Ok(())
    }

    pub async fn remove_role_from_all_users(&self, role: &str) -> Result<u64, ControlError> {
        Ok(self.users.remove_role_from_all(role).await?)
    }

    pub async fn list_users_with_role(&self, role: &str) -> Result<Vec<User>, ControlError> {
        Ok(self.users.list_with_role(role).await?)
    }

    /// Users whose effective permissions cover at least one of `wanted`
    pub async fn list_users_with_permissions(
        &self,
        wanted: &[Permission],
    ) -> Result<Vec<User>, ControlError> {
        let mut cache = RoleCache::new();
        let mut matching = Vec::new();

        for user in self.users.list().await? {
            let principal = Principal::User(user);
            let set = self.resolve(&principal, &mut cache).await?;
            let covered = wanted
                .iter()
                .any(|p| set.check(p.scheme, std::slice::from_ref(&p.context)));
            if covered {
                if let Principal::User(user) = principal {
                    matching.push(user);
                }
            }
        }

        Ok(matching)
    }

    /// Assigns every role bound to `event` at `context_value`
    pub async fn add_roles_for_event(
        &self,
        email: &str,
        event: RoleEvent,
        context_value: &str,
    ) -> Result<Vec<String>, ControlError> {
        let roles = self.roles.list_by_event(event.as_str()).await?;
        let mut assigned = Vec::with_capacity(roles.len());

        for role in roles {
            let instance = RoleInstance::new(&role.name, context_value);
            if !self.users.add_role(email, &instance).await? {
                return Err(user_not_found());
            }
            assigned.push(role.name);
        }

        if !assigned.is_empty() {
            tracing::info!(
                "Roles {:?} assigned to {} on {}",
                assigned,
                email,
                event.as_str()
            );
        }
        Ok(assigned)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn role_not_found() -> ControlError {
    ControlError::NotFound("Role not found.".to_string())
}

fn user_not_found() -> ControlError {
    ControlError::NotFound("User not found.".to_string())
}
