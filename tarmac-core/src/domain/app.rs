//! Application domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::permission::Context;

/// A deployable application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub platform: String,
    pub team_owner: String,
    /// Teams with access besides the owner
    pub teams: Vec<String>,
    /// Number of successful deploys
    pub deploys: u64,
    pub created_at: DateTime<Utc>,
}

impl App {
    pub fn new(name: impl Into<String>, team_owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: String::new(),
            team_owner: team_owner.into(),
            teams: Vec::new(),
            deploys: 0,
            created_at: Utc::now(),
        }
    }

    /// Every context a permission check on this app may match: the app
    /// itself and each team that has access to it.
    pub fn contexts(&self) -> Vec<Context> {
        let mut contexts = vec![Context::app(&self.name)];
        if !self.team_owner.is_empty() {
            contexts.push(Context::team(&self.team_owner));
        }
        for team in &self.teams {
            let ctx = Context::team(team);
            if !contexts.contains(&ctx) {
                contexts.push(ctx);
            }
        }
        contexts
    }
}

/// Validates an application name: lowercase letters, digits and dashes,
/// starting with a letter, at most 40 characters.
pub fn is_valid_app_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= 40 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
