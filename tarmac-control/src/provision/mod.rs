//! Provisioning backends
//!
//! A provisioner turns normalized deploy options into a runnable image for
//! an application. One implementation exists per backend kind; the one in
//! use is chosen from configuration at start-up.

pub mod fake;
pub mod podman;

use std::sync::Arc;

use async_trait::async_trait;
use tarmac_core::domain::app::App;
use tarmac_core::domain::deploy::DeployOptions;
use thiserror::Error;

use crate::config::{Config, ProvisionerKind};
use crate::service::event::EventLogWriter;

pub use fake::FakeProvisioner;
pub use podman::PodmanProvisioner;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unsupported(String),

    #[error("failed to write deploy log: {0}")]
    Log(String),

    #[error("{0}")]
    Failed(String),
}

/// Deploy collaborator
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deploys `app` and returns the resulting image reference. Progress is
    /// written to the event log through `log`.
    async fn deploy(
        &self,
        app: &App,
        options: &DeployOptions,
        log: &mut EventLogWriter,
    ) -> Result<String, ProvisionError>;
}

/// Builds the provisioner selected by `config`
pub fn from_config(config: &Config) -> Arc<dyn Provisioner> {
    match config.provisioner {
        ProvisionerKind::Fake => Arc::new(FakeProvisioner::new()),
        ProvisionerKind::Podman => Arc::new(PodmanProvisioner::new(config.image_naming.clone())),
    }
}

/// Writes to the event log, mapping failures into [`ProvisionError`]
pub(crate) async fn log_line(log: &mut EventLogWriter, line: &str) -> Result<(), ProvisionError> {
    log.write(line)
        .await
        .map_err(|e| ProvisionError::Log(e.to_string()))?;
    if !line.ends_with('\n') {
        log.write("\n")
            .await
            .map_err(|e| ProvisionError::Log(e.to_string()))?;
    }
    Ok(())
}
