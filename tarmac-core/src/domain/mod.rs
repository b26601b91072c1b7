//! Core domain types
//!
//! This module contains the core domain structures used across Tarmac.
//! These types represent the fundamental business entities and are shared
//! between the storage backends (for persistence) and the services (for
//! locking, authorization and deploy dispatch).

pub mod app;
pub mod deploy;
pub mod event;
pub mod image;
pub mod permission;
pub mod principal;
