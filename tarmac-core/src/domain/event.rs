//! Event domain types
//!
//! An [`Event`] is both the lock on a [`Target`] and the audit record of the
//! action performed while holding it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::permission::Scheme;

/// The entity an event applies to, e.g. `app(myblog)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub target_type: String,
    pub value: String,
}

impl Target {
    pub const APP: &'static str = "app";

    pub fn new(target_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            value: value.into(),
        }
    }

    /// Target for an application
    pub fn app(name: impl Into<String>) -> Self {
        Self::new(Self::APP, name)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.target_type, self.value)
    }
}

/// Kind of principal that created an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    User,
    App,
    Internal,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::User => "user",
            OwnerType::App => "app",
            OwnerType::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(OwnerType::User),
            "app" => Some(OwnerType::App),
            "internal" => Some(OwnerType::Internal),
            _ => None,
        }
    }
}

/// Principal that created an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(rename = "type")]
    pub owner_type: OwnerType,
    pub name: String,
}

impl Owner {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            owner_type: OwnerType::User,
            name: name.into(),
        }
    }

    pub fn app(name: impl Into<String>) -> Self {
        Self {
            owner_type: OwnerType::App,
            name: name.into(),
        }
    }
}

/// Lifecycle state derived from an event's running flag and error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Running,
    Succeeded,
    Failed,
}

/// A locked, auditable record of one action against a target.
///
/// While `running` is true no other event may run for the same target.
/// Once finalized the record is read-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub target: Target,
    /// Name of the permission scheme the action required
    pub kind: String,
    pub owner: Owner,
    pub running: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_custom_data: serde_json::Value,
    pub end_custom_data: serde_json::Value,
    /// Data attached while running (e.g. a deploy diff)
    pub other_custom_data: serde_json::Value,
    pub log: String,
    pub error: String,
    pub remove_date: Option<DateTime<Utc>>,
}

impl Event {
    /// Builds a fresh running event. Nothing is persisted here.
    pub fn new(
        target: Target,
        kind: Scheme,
        owner: Owner,
        start_custom_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            kind: kind.name().to_string(),
            owner,
            running: true,
            start_time: Utc::now(),
            end_time: None,
            start_custom_data,
            end_custom_data: serde_json::Value::Null,
            other_custom_data: serde_json::Value::Null,
            log: String::new(),
            error: String::new(),
            remove_date: None,
        }
    }

    pub fn status(&self) -> EventStatus {
        if self.running {
            EventStatus::Running
        } else if self.error.is_empty() {
            EventStatus::Succeeded
        } else {
            EventStatus::Failed
        }
    }

    /// Wall-clock duration; zero while running.
    pub fn duration(&self) -> chrono::Duration {
        match self.end_time {
            Some(end) => end.signed_duration_since(self.start_time),
            None => chrono::Duration::zero(),
        }
    }

    /// True for every event recorded under the `app.deploy` scheme subtree
    pub fn is_deploy(&self) -> bool {
        Scheme::APP_DEPLOY.is_ancestor_of_name(&self.kind)
    }

    /// Applies a completion to this event in place.
    pub fn finish(&mut self, completion: &EventCompletion) {
        self.running = false;
        self.end_time = Some(completion.end_time);
        if let Some(err) = &completion.error {
            self.error = err.clone();
        }
        merge_custom_data(&mut self.end_custom_data, completion.end_custom_data.clone());
    }
}

/// Outcome data written by the single finalize call of an event
#[derive(Debug, Clone)]
pub struct EventCompletion {
    pub end_time: DateTime<Utc>,
    pub error: Option<String>,
    pub end_custom_data: serde_json::Value,
}

impl EventCompletion {
    pub fn new(error: Option<String>, end_custom_data: serde_json::Value) -> Self {
        Self {
            end_time: Utc::now(),
            error: error.filter(|e| !e.is_empty()),
            end_custom_data,
        }
    }
}

/// Merges `update` into `existing`.
///
/// Objects are merged key by key; `null` leaves `existing` untouched; any
/// other value replaces it.
pub fn merge_custom_data(existing: &mut serde_json::Value, update: serde_json::Value) {
    use serde_json::Value;

    match (existing, update) {
        (_, Value::Null) => {}
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                current.insert(key, value);
            }
        }
        (slot, value) => *slot = value,
    }
}
