//! Deploy DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text fields of a deploy request. An uploaded bundle travels beside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployRequest {
    #[serde(rename = "archive-url")]
    pub archive_url: String,
    pub image: String,
    pub commit: String,
    pub user: String,
    pub origin: String,
    pub build: bool,
    pub message: String,
}

/// Request to roll an application back to a recorded image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackRequest {
    /// Full reference or bare version tag
    pub image: String,
    pub origin: String,
}

/// Request to attach a diff to the running deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRequest {
    pub diff: String,
}

/// Result of a deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub event_id: Uuid,
    pub image: String,
}

/// Query of the deploy listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDeploysQuery {
    pub app: Option<String>,
    pub limit: Option<usize>,
}
