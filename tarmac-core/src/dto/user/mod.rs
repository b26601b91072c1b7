//! User DTOs

use serde::{Deserialize, Serialize};

/// Request to create a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
}

/// A created user with its first token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedUser {
    pub email: String,
    pub token: String,
}
