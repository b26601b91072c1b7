//! Tarmac Control Plane
//!
//! Serializes deploys per application, authorizes every action against
//! role-derived permissions and records each action as an auditable event.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod provision;
pub mod repository;
pub mod service;
