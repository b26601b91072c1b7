//! Service error type

use tarmac_core::domain::event::Target;
use thiserror::Error;
use uuid::Uuid;

use crate::provision::ProvisionError;
use crate::repository::StoreError;

/// Fixed message of a deploy request without a source
pub const MISSING_DEPLOY_SOURCE: &str =
    "you must specify either the archive-url, a image url or upload a file";

#[derive(Debug, Error)]
pub enum ControlError {
    /// A conflicting action is already running for the target
    #[error("event locked: {target} is busy with event {event_id}")]
    Locked { target: Target, event_id: Uuid },

    #[error("You don't have permission to do this action")]
    PermissionDenied,

    #[error("{0}")]
    Validation(String),

    #[error("invalid version: {0:?}")]
    InvalidVersion(String),

    /// Missing, or not visible to the caller
    #[error("{0}")]
    NotFound(String),

    /// The entity being created already exists
    #[error("{0}")]
    Conflict(String),

    #[error("event {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Backend(#[from] StoreError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            ControlError::InvalidVersion("v3".to_string()).to_string(),
            "invalid version: \"v3\""
        );
        assert_eq!(
            ControlError::Validation(MISSING_DEPLOY_SOURCE.to_string()).to_string(),
            MISSING_DEPLOY_SOURCE
        );
        let locked = ControlError::Locked {
            target: Target::app("g1"),
            event_id: Uuid::nil(),
        };
        assert!(locked.to_string().starts_with("event locked: app(g1)"));
    }
}
