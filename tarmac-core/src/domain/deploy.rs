//! Deploy domain types
//!
//! [`DeployOptions`] is the normalized, per-request input of a deploy.
//! [`DeployData`] is the read projection of a finished or running deploy event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::Event;
use crate::domain::permission::Scheme;

/// Origins a deploy request may declare
pub const VALID_ORIGINS: &[&str] = &["app-deploy", "git", "rollback", "drag-and-drop", "image"];

pub fn is_valid_origin(origin: &str) -> bool {
    VALID_ORIGINS.contains(&origin)
}

/// An uploaded deploy bundle
#[derive(Clone, Default)]
pub struct DeployFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl DeployFile {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

impl std::fmt::Debug for DeployFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployFile")
            .field("name", &self.name)
            .field("size", &self.content.len())
            .finish()
    }
}

/// Normalized input of one deploy. Never persisted as-is.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub commit: String,
    pub image: String,
    pub archive_url: String,
    pub file: Option<DeployFile>,
    pub build: bool,
    pub rollback: bool,
    pub origin: String,
    /// Principal recorded on the event (may be a git pusher)
    pub user: String,
    pub message: String,
}

impl DeployOptions {
    /// True when the request names something to deploy
    pub fn has_source(&self) -> bool {
        !self.archive_url.is_empty() || !self.image.is_empty() || self.file.is_some()
    }

    pub fn file_size(&self) -> u64 {
        self.file.as_ref().map(DeployFile::size).unwrap_or(0)
    }
}

/// Concrete deploy strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployKind {
    ArchiveUrl,
    Upload,
    Build,
    Image,
    Git,
    Rollback,
}

impl DeployKind {
    /// Kind of a request. Rollback wins over every other field.
    pub fn of(options: &DeployOptions) -> Self {
        if options.rollback {
            DeployKind::Rollback
        } else {
            Self::from_source(options)
        }
    }

    /// Source precedence: image, file with build, file, commit, archive-url.
    fn from_source(options: &DeployOptions) -> Self {
        if !options.image.is_empty() {
            DeployKind::Image
        } else if options.file.is_some() && options.build {
            DeployKind::Build
        } else if options.file.is_some() {
            DeployKind::Upload
        } else if !options.commit.is_empty() {
            DeployKind::Git
        } else {
            DeployKind::ArchiveUrl
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployKind::ArchiveUrl => "archive-url",
            DeployKind::Upload => "upload",
            DeployKind::Build => "build",
            DeployKind::Image => "image",
            DeployKind::Git => "git",
            DeployKind::Rollback => "rollback",
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            DeployKind::ArchiveUrl => Scheme::APP_DEPLOY_ARCHIVE_URL,
            DeployKind::Upload => Scheme::APP_DEPLOY_UPLOAD,
            DeployKind::Build => Scheme::APP_DEPLOY_BUILD,
            DeployKind::Image => Scheme::APP_DEPLOY_IMAGE,
            DeployKind::Git => Scheme::APP_DEPLOY_GIT,
            DeployKind::Rollback => Scheme::APP_DEPLOY_ROLLBACK,
        }
    }

    /// Label used in logs, e.g. "Image deploy called"
    pub fn title(&self) -> &'static str {
        match self {
            DeployKind::ArchiveUrl => "Archive",
            DeployKind::Upload => "Upload",
            DeployKind::Build => "Build",
            DeployKind::Image => "Image",
            DeployKind::Git => "Git",
            DeployKind::Rollback => "Rollback",
        }
    }
}

impl std::fmt::Display for DeployKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permission scheme a deploy requires. Total over every [`DeployOptions`];
/// the rollback flag does not participate.
pub fn scheme_for(options: &DeployOptions) -> Scheme {
    DeployKind::from_source(options).scheme()
}

/// Start custom data recorded on a deploy event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployStartData {
    #[serde(rename = "app.name")]
    pub app_name: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "archiveurl")]
    pub archive_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub rollback: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl DeployStartData {
    pub fn new(app_name: &str, options: &DeployOptions) -> Self {
        Self {
            app_name: app_name.to_string(),
            commit: options.commit.clone(),
            filesize: options.file_size(),
            kind: DeployKind::of(options).as_str().to_string(),
            archive_url: options.archive_url.clone(),
            user: options.user.clone(),
            image: options.image.clone(),
            origin: options.origin.clone(),
            build: options.build,
            rollback: options.rollback,
            message: options.message.clone(),
        }
    }
}

/// Queryable projection of a deploy event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployData {
    pub id: Uuid,
    pub app: String,
    pub commit: String,
    pub image: String,
    pub origin: String,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds; zero while running
    pub duration: f64,
    pub error: String,
    pub diff: String,
    pub can_rollback: bool,
    pub remove_date: Option<DateTime<Utc>>,
}

impl DeployData {
    /// Projects an event. `image` is taken from the end data when the
    /// deploy finished, otherwise from the requested image. Unreadable
    /// start data is logged and projected as empty.
    pub fn from_event(event: &Event) -> Self {
        let parsed = serde_json::from_value::<DeployStartData>(event.start_custom_data.clone());
        let start = match parsed {
            Ok(start) => start,
            Err(err) => {
                tracing::warn!("Deploy {} has unreadable start data: {}", event.id, err);
                DeployStartData::default()
            }
        };

        let image = string_field(&event.end_custom_data, "image").unwrap_or(start.image);
        let diff = string_field(&event.other_custom_data, "diff").unwrap_or_default();
        let user = if start.user.is_empty() {
            event.owner.name.clone()
        } else {
            start.user
        };

        Self {
            id: event.id,
            app: event.target.value.clone(),
            commit: start.commit,
            image,
            origin: start.origin,
            user,
            timestamp: event.start_time,
            duration: event.duration().num_milliseconds() as f64 / 1000.0,
            error: event.error.clone(),
            diff,
            can_rollback: false,
            remove_date: event.remove_date,
        }
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
