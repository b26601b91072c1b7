//! Event Service
//!
//! The lock manager. Opening an event takes the per-target lock, closing it
//! releases the lock and freezes the record as history. Deploy events are
//! exposed to callers through the [`DeployData`] projection.

use std::collections::HashMap;
use std::sync::Arc;

use tarmac_core::domain::deploy::DeployData;
use tarmac_core::domain::event::{Event, EventCompletion, Owner, Target};
use tarmac_core::domain::image::ImageNaming;
use tarmac_core::domain::permission::{Context, ContextType, PermissionSet, Scheme};
use uuid::Uuid;

use crate::repository::{
    AppRepository, EventFilter, EventRepository, InsertOutcome, Repositories, WriteOutcome,
};
use crate::service::error::ControlError;

/// Everything needed to open an event
#[derive(Debug, Clone)]
pub struct OpenEvent {
    pub target: Target,
    pub kind: Scheme,
    pub owner: Owner,
    pub start_custom_data: serde_json::Value,
    /// Contexts the caller's grant of `kind` must cover
    pub allowed: Vec<Context>,
}

/// Which deploys a listing may return
#[derive(Debug, Clone, Default)]
pub struct DeployScope {
    /// Restrict to one application
    pub app: Option<String>,
    pub limit: Option<usize>,
}

pub struct EventService {
    events: Arc<dyn EventRepository>,
    apps: Arc<dyn AppRepository>,
    naming: ImageNaming,
}

impl EventService {
    pub fn new(repos: &Repositories, naming: ImageNaming) -> Self {
        Self {
            events: repos.events.clone(),
            apps: repos.apps.clone(),
            naming,
        }
    }

    /// Opens a running event, failing fast if the target is busy.
    ///
    /// Authorization is evaluated first; a denied caller never touches the
    /// store. There is no wait queue: a contended target yields
    /// [`ControlError::Locked`] carrying the running event's id.
    pub async fn open(
        &self,
        req: OpenEvent,
        permissions: &PermissionSet,
    ) -> Result<Event, ControlError> {
        if !permissions.check(req.kind, &req.allowed) {
            tracing::debug!(
                "Opening {} on {} denied for {}",
                req.kind,
                req.target,
                req.owner.name
            );
            return Err(ControlError::PermissionDenied);
        }

        let event = Event::new(req.target, req.kind, req.owner, req.start_custom_data);

        match self.events.insert_if_idle(&event).await? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    "Event {} opened: {} on {} by {}",
                    event.id,
                    event.kind,
                    event.target,
                    event.owner.name
                );
                Ok(event)
            }
            InsertOutcome::Locked(event_id) => {
                tracing::info!("{} is locked by event {}", event.target, event_id);
                Err(ControlError::Locked {
                    target: event.target,
                    event_id,
                })
            }
        }
    }

    /// Appends text to a running event's log
    pub async fn append_log(&self, event_id: Uuid, text: &str) -> Result<(), ControlError> {
        outcome(event_id, self.events.append_log(event_id, text).await?)
    }

    /// A line-buffered log handle for one writer
    pub fn log_writer(&self, event_id: Uuid) -> EventLogWriter {
        EventLogWriter {
            events: self.events.clone(),
            event_id,
            pending: String::new(),
        }
    }

    /// Finalizes an event. A second close fails with
    /// [`ControlError::AlreadyClosed`] and leaves history untouched.
    pub async fn close(
        &self,
        event_id: Uuid,
        error: Option<String>,
        end_custom_data: serde_json::Value,
    ) -> Result<(), ControlError> {
        let completion = EventCompletion::new(error, end_custom_data);
        let result = self.events.finish(event_id, &completion).await?;

        if result == WriteOutcome::Finished {
            tracing::error!("Event {} closed twice", event_id);
        }
        outcome(event_id, result)?;

        match &completion.error {
            Some(err) => tracing::warn!("Event {} closed as failed: {}", event_id, err),
            None => tracing::info!("Event {} closed successfully", event_id),
        }
        Ok(())
    }

    /// Merges data into a running event's other custom data
    pub async fn set_other_custom_data(
        &self,
        event_id: Uuid,
        data: serde_json::Value,
    ) -> Result<(), ControlError> {
        outcome(
            event_id,
            self.events.merge_other_custom_data(event_id, &data).await?,
        )
    }

    pub async fn find_running(&self, target: &Target) -> Result<Option<Event>, ControlError> {
        Ok(self.events.find_running(target).await?)
    }

    // =========================================================================
    // Deploy queries
    // =========================================================================

    /// Deploys the caller may read, newest first. Unreadable targets are
    /// omitted, never reported.
    pub async fn list_deploys(
        &self,
        scope: &DeployScope,
        permissions: &PermissionSet,
    ) -> Result<Vec<DeployData>, ControlError> {
        let readable = self.readable_apps(permissions).await?;

        let target_values = match (&scope.app, readable) {
            (Some(app), None) => Some(vec![app.clone()]),
            (Some(app), Some(apps)) if apps.contains(app) => Some(vec![app.clone()]),
            (Some(_), Some(_)) => return Ok(Vec::new()),
            (None, readable) => readable,
        };
        if target_values.as_ref().is_some_and(|v| v.is_empty()) {
            return Ok(Vec::new());
        }

        let filter = EventFilter {
            target_type: Some(Target::APP.to_string()),
            target_values,
            kind: Some(Scheme::APP_DEPLOY.name().to_string()),
            limit: scope.limit,
        };
        let events = self.events.list(&filter).await?;

        let mut histories: HashMap<String, Vec<String>> = HashMap::new();
        let mut deploys = Vec::with_capacity(events.len());
        for event in &events {
            if !histories.contains_key(&event.target.value) {
                let history = self.apps.image_history(&event.target.value).await?;
                histories.insert(event.target.value.clone(), history);
            }
            let history = histories
                .get(&event.target.value)
                .map(Vec::as_slice)
                .unwrap_or_default();
            deploys.push(self.project(event, history));
        }

        Ok(deploys)
    }

    /// A single deploy. Missing and unreadable deploys are indistinguishable.
    pub async fn get_deploy(
        &self,
        event_id: Uuid,
        permissions: &PermissionSet,
    ) -> Result<DeployData, ControlError> {
        let event = self
            .events
            .find_by_id(event_id)
            .await?
            .filter(|e| e.target.target_type == Target::APP && e.is_deploy())
            .ok_or_else(deploy_not_found)?;

        let contexts = match self.apps.find(&event.target.value).await? {
            Some(app) => app.contexts(),
            None => vec![Context::app(&event.target.value)],
        };
        if !permissions.check(Scheme::APP_READ_DEPLOY, &contexts) {
            tracing::debug!("Deploy {} hidden from caller", event_id);
            return Err(deploy_not_found());
        }

        let history = self.apps.image_history(&event.target.value).await?;
        Ok(self.project(&event, &history))
    }

    /// Names of apps the caller may read deploys of; `None` means all.
    async fn readable_apps(
        &self,
        permissions: &PermissionSet,
    ) -> Result<Option<Vec<String>>, ControlError> {
        let contexts = permissions.contexts_for(Scheme::APP_READ_DEPLOY);

        let mut apps: Vec<String> = Vec::new();
        let mut teams: Vec<String> = Vec::new();
        for context in contexts {
            match context.context_type {
                ContextType::Global => return Ok(None),
                ContextType::App => apps.push(context.value),
                ContextType::Team => teams.push(context.value),
                ContextType::User => {}
            }
        }

        if !teams.is_empty() {
            for app in self.apps.list_for_teams(&teams).await? {
                if !apps.contains(&app.name) {
                    apps.push(app.name);
                }
            }
        }
        Ok(Some(apps))
    }

    /// Projects an event, reducing own-repository images to their tag.
    fn project(&self, event: &Event, history: &[String]) -> DeployData {
        let mut data = DeployData::from_event(event);

        data.can_rollback = !event.running
            && data.error.is_empty()
            && !data.image.is_empty()
            && history.contains(&data.image);
        data.image = self.naming.display_image(&data.app, &data.image).to_string();
        data
    }
}

/// Line-buffered writer into one event's log.
///
/// Only whole lines reach the store, so concurrent writers on the same
/// event interleave at line granularity at worst.
pub struct EventLogWriter {
    events: Arc<dyn EventRepository>,
    event_id: Uuid,
    pending: String,
}

impl EventLogWriter {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub async fn write(&mut self, text: &str) -> Result<(), ControlError> {
        self.pending.push_str(text);

        if let Some(end) = self.pending.rfind('\n') {
            let rest = self.pending.split_off(end + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            self.append(&complete).await?;
        }
        Ok(())
    }

    /// Writes any trailing partial line
    pub async fn flush(&mut self) -> Result<(), ControlError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let partial = std::mem::take(&mut self.pending);
        self.append(&partial).await
    }

    async fn append(&self, text: &str) -> Result<(), ControlError> {
        outcome(self.event_id, self.events.append_log(self.event_id, text).await?)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn outcome(event_id: Uuid, result: WriteOutcome) -> Result<(), ControlError> {
    match result {
        WriteOutcome::Applied => Ok(()),
        WriteOutcome::Finished => Err(ControlError::AlreadyClosed(event_id)),
        WriteOutcome::Missing => Err(ControlError::NotFound("Event not found.".to_string())),
    }
}

fn deploy_not_found() -> ControlError {
    ControlError::NotFound("Deploy not found.".to_string())
}
