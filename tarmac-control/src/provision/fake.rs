//! In-process provisioner for tests and development runs

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tarmac_core::domain::app::App;
use tarmac_core::domain::deploy::{DeployKind, DeployOptions};

use super::{ProvisionError, Provisioner, log_line};
use crate::service::event::EventLogWriter;

/// Image returned for deploys that build one
pub const FAKE_IMAGE: &str = "app-image";

/// Records calls and succeeds unless primed to fail
#[derive(Default)]
pub struct FakeProvisioner {
    failures: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, DeployKind)>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next deploy fail with `message`
    pub fn prepare_failure(&self, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(message.into());
    }

    /// (app, kind) of every deploy so far
    pub fn calls(&self) -> Vec<(String, DeployKind)> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Git deploys arrive as archives, so they share the archive label
fn label(kind: DeployKind) -> &'static str {
    match kind {
        DeployKind::Git => DeployKind::ArchiveUrl.title(),
        other => other.title(),
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn deploy(
        &self,
        app: &App,
        options: &DeployOptions,
        log: &mut EventLogWriter,
    ) -> Result<String, ProvisionError> {
        let kind = DeployKind::of(options);
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((app.name.clone(), kind));

        log_line(log, &format!("{} deploy called", label(kind))).await?;

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        if let Some(message) = failure {
            return Err(ProvisionError::Failed(message));
        }

        Ok(match kind {
            DeployKind::Image | DeployKind::Rollback => options.image.clone(),
            _ => FAKE_IMAGE.to_string(),
        })
    }
}
