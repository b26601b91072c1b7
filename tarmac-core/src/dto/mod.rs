//! Data Transfer Objects exchanged with the control plane
//!
//! DTOs are the request and response shapes of the control plane's HTTP
//! boundary. They are plain serde structs; validation happens in the
//! services that consume them.

pub mod app;
pub mod deploy;
pub mod role;
pub mod user;
