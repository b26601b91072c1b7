//! In-memory implementation of every repository trait.
//!
//! [`MemoryStore`] keeps all state behind a single mutex, so each trait
//! call is atomic with respect to every other call. In particular the
//! event check-and-insert happens under one guard.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tarmac_core::domain::app::App;
use tarmac_core::domain::event::{Event, EventCompletion, Target, merge_custom_data};
use tarmac_core::domain::permission::{Role, RoleInstance};
use tarmac_core::domain::principal::User;
use uuid::Uuid;

use super::{
    AppRepository, EventFilter, EventRepository, InsertOutcome, RoleRepository, StoreError,
    TokenRepository, TokenSubject, UserRepository, WriteOutcome,
};

#[derive(Default)]
struct State {
    /// Events in insertion order
    events: Vec<Event>,
    apps: HashMap<String, App>,
    images: HashMap<String, Vec<String>>,
    /// Roles in creation order
    roles: Vec<Role>,
    /// Users in creation order
    users: Vec<User>,
    tokens: HashMap<String, TokenSubject>,
}

impl State {
    fn event_mut(&mut self, id: Uuid) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    fn role_mut(&mut self, name: &str) -> Option<&mut Role> {
        self.roles.iter_mut().find(|r| r.name == name)
    }

    fn user_mut(&mut self, email: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.email == email)
    }

    /// Applies `write` to a running event
    fn write_running(&mut self, id: Uuid, write: impl FnOnce(&mut Event)) -> WriteOutcome {
        match self.event_mut(id) {
            None => WriteOutcome::Missing,
            Some(event) if !event.running => WriteOutcome::Finished,
            Some(event) => {
                write(event);
                WriteOutcome::Applied
            }
        }
    }
}

/// Process-local store for tests and development runs
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn insert_if_idle(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state();
        if let Some(running) = state
            .events
            .iter()
            .find(|e| e.running && e.target == event.target)
        {
            return Ok(InsertOutcome::Locked(running.id));
        }
        state.events.push(event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn append_log(&self, id: Uuid, text: &str) -> Result<WriteOutcome, StoreError> {
        Ok(self.state().write_running(id, |e| e.log.push_str(text)))
    }

    async fn finish(
        &self,
        id: Uuid,
        completion: &EventCompletion,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self.state().write_running(id, |e| e.finish(completion)))
    }

    async fn merge_other_custom_data(
        &self,
        id: Uuid,
        data: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self
            .state()
            .write_running(id, |e| merge_custom_data(&mut e.other_custom_data, data.clone())))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.state().events.iter().find(|e| e.id == id).cloned())
    }

    async fn find_running(&self, target: &Target) -> Result<Option<Event>, StoreError> {
        Ok(self
            .state()
            .events
            .iter()
            .find(|e| e.running && &e.target == target)
            .cloned())
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let state = self.state();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        // Stable sort keeps later inserts first among equal timestamps
        events.reverse();
        events.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}

#[async_trait]
impl AppRepository for MemoryStore {
    async fn find(&self, name: &str) -> Result<Option<App>, StoreError> {
        Ok(self.state().apps.get(name).cloned())
    }

    async fn insert(&self, app: &App) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.apps.contains_key(&app.name) {
            return Ok(false);
        }
        state.apps.insert(app.name.clone(), app.clone());
        Ok(true)
    }

    async fn list_for_teams(&self, teams: &[String]) -> Result<Vec<App>, StoreError> {
        let state = self.state();
        let mut apps: Vec<App> = state
            .apps
            .values()
            .filter(|app| {
                teams.contains(&app.team_owner) || app.teams.iter().any(|t| teams.contains(t))
            })
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    async fn increment_deploys(&self, name: &str) -> Result<(), StoreError> {
        if let Some(app) = self.state().apps.get_mut(name) {
            app.deploys += 1;
        }
        Ok(())
    }

    async fn append_image(&self, name: &str, image: &str) -> Result<(), StoreError> {
        self.state()
            .images
            .entry(name.to_string())
            .or_default()
            .push(image.to_string());
        Ok(())
    }

    async fn image_history(&self, name: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.state().images.get(name).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn find(&self, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.state().roles.iter().find(|r| r.name == name).cloned())
    }

    async fn insert(&self, role: &Role) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.roles.iter().any(|r| r.name == role.name) {
            return Ok(false);
        }
        state.roles.push(role.clone());
        Ok(true)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.roles.len();
        state.roles.retain(|r| r.name != name);
        Ok(state.roles.len() != before)
    }

    async fn add_schemes(&self, name: &str, schemes: &[String]) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(role) = state.role_mut(name) else {
            return Ok(false);
        };
        for scheme in schemes {
            if !role.scheme_names.contains(scheme) {
                role.scheme_names.push(scheme.clone());
            }
        }
        Ok(true)
    }

    async fn add_event(&self, name: &str, event: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(role) = state.role_mut(name) else {
            return Ok(false);
        };
        if !role.events.iter().any(|e| e == event) {
            role.events.push(event.to_string());
        }
        Ok(true)
    }

    async fn list_by_event(&self, event: &str) -> Result<Vec<Role>, StoreError> {
        Ok(self
            .state()
            .roles
            .iter()
            .filter(|r| r.events.iter().any(|e| e == event))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state().users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: &User) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.users.iter().any(|u| u.email == user.email) {
            return Ok(false);
        }
        state.users.push(user.clone());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.state().users.clone())
    }

    async fn delete(&self, email: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.users.len();
        state.users.retain(|u| u.email != email);
        Ok(state.users.len() != before)
    }

    async fn add_role(&self, email: &str, role: &RoleInstance) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(user) = state.user_mut(email) else {
            return Ok(false);
        };
        if !user.roles.contains(role) {
            user.roles.push(role.clone());
        }
        Ok(true)
    }

    async fn remove_role(&self, email: &str, role: &RoleInstance) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(user) = state.user_mut(email) else {
            return Ok(false);
        };
        user.roles.retain(|r| r != role);
        Ok(true)
    }

    async fn remove_role_from_all(&self, role: &str) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for user in self.state().users.iter_mut() {
            let before = user.roles.len();
            user.roles.retain(|r| r.name != role);
            removed += (before - user.roles.len()) as u64;
        }
        Ok(removed)
    }

    async fn list_with_role(&self, role: &str) -> Result<Vec<User>, StoreError> {
        Ok(self
            .state()
            .users
            .iter()
            .filter(|u| u.roles.iter().any(|r| r.name == role))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, token: &str, subject: &TokenSubject) -> Result<(), StoreError> {
        self.state()
            .tokens
            .insert(token.to_string(), subject.clone());
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<TokenSubject>, StoreError> {
        Ok(self.state().tokens.get(token).cloned())
    }
}
