//! Application DTOs

use serde::{Deserialize, Serialize};

/// Request to create an application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApp {
    pub name: String,
    pub team_owner: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub teams: Vec<String>,
}

/// A freshly issued application token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppToken {
    pub app: String,
    pub token: String,
}
