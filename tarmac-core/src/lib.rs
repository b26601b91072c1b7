//! Tarmac Core
//!
//! Core types and abstractions for the Tarmac application platform.
//!
//! This crate contains:
//! - Domain types: events and their targets, deploy options, permissions,
//!   roles, principals and applications
//! - DTOs: request and response shapes exchanged with the control plane

pub mod domain;
pub mod dto;
