//! Service Module
//!
//! Business logic layer of the control plane.
//! Services orchestrate between repositories, the permission engine and the
//! provisioner.

pub mod app;
pub mod deploy;
pub mod error;
pub mod event;
pub mod permission;
pub mod role;
pub mod rollback;
pub mod user;

pub use deploy::{DeployDispatcher, DeployOutcome};
pub use error::ControlError;
pub use event::EventService;
pub use permission::PermissionEngine;
