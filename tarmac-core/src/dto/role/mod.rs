//! Role management DTOs

use serde::{Deserialize, Serialize};

use crate::domain::permission::ContextType;

/// Request to create a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    pub context_type: ContextType,
    #[serde(default)]
    pub description: String,
}

/// Request to add schemes to a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPermissions {
    pub schemes: Vec<String>,
}

/// Assignment or dissociation of a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub email: String,
    #[serde(default)]
    pub context_value: String,
}
