//! Podman provisioner
//!
//! Builds or pulls application images with the local `podman` binary:
//! - image deploys pull the image and tag it into the app repository
//! - archive-url and git deploys build from the archive URL
//! - upload and build deploys stream the bundle to `podman build` on stdin
//! - rollbacks re-tag the resolved image as the app's `latest`
//!
//! Command output is streamed line by line into the event log.

use std::process::Stdio;

use async_trait::async_trait;
use tarmac_core::domain::app::App;
use tarmac_core::domain::deploy::{DeployKind, DeployOptions};
use tarmac_core::domain::image::ImageNaming;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use super::{ProvisionError, Provisioner, log_line};
use crate::service::event::EventLogWriter;

/// Checks that podman is installed and working
pub async fn check_podman_available() -> Result<String, ProvisionError> {
    let output = Command::new("podman").arg("--version").output().await?;

    if !output.status.success() {
        return Err(ProvisionError::Command {
            command: "podman --version".to_string(),
            message: "podman is not working correctly".to_string(),
        });
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    info!("Podman is available: {}", version);
    Ok(version)
}

pub struct PodmanProvisioner {
    naming: ImageNaming,
}

impl PodmanProvisioner {
    pub fn new(naming: ImageNaming) -> Self {
        Self { naming }
    }

    /// Runs `podman <args>`, streaming its output into the event log.
    ///
    /// `input` is written to the child's stdin when given.
    async fn run(
        &self,
        args: &[&str],
        input: Option<Vec<u8>>,
        log: &mut EventLogWriter,
    ) -> Result<(), ProvisionError> {
        let label = format!("podman {}", args.join(" "));
        log_line(log, &format!(" ---> {}", label)).await?;
        debug!("Running {}", label);

        let mut command = Command::new("podman");
        command.args(args);
        stream_output(label, command, input, log).await
    }

    /// Pushes `image` when a registry is configured
    async fn push(&self, image: &str, log: &mut EventLogWriter) -> Result<(), ProvisionError> {
        if self.naming.registry.is_some() {
            self.run(&["push", image], None, log).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for PodmanProvisioner {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn deploy(
        &self,
        app: &App,
        options: &DeployOptions,
        log: &mut EventLogWriter,
    ) -> Result<String, ProvisionError> {
        let kind = DeployKind::of(options);
        let target = self.naming.versioned(&app.name, app.deploys + 1);
        let latest = format!("{}:latest", self.naming.app_repository(&app.name));

        info!("{} deploy of {} to {}", kind.title(), app.name, target);
        log_line(log, &format!("{} deploy called", kind.title())).await?;

        match kind {
            DeployKind::Rollback => {
                self.run(&["tag", options.image.as_str(), latest.as_str()], None, log).await?;
                self.push(&latest, log).await?;
                return Ok(options.image.clone());
            }
            DeployKind::Image => {
                self.run(&["pull", options.image.as_str()], None, log).await?;
                self.run(&["tag", options.image.as_str(), target.as_str()], None, log)
                    .await?;
            }
            DeployKind::ArchiveUrl | DeployKind::Git => {
                if options.archive_url.is_empty() {
                    return Err(ProvisionError::Unsupported(format!(
                        "{} deploys require an archive-url",
                        kind
                    )));
                }
                self.run(&["build", "-t", target.as_str(), options.archive_url.as_str()], None, log)
                    .await?;
            }
            DeployKind::Upload | DeployKind::Build => {
                let file = options.file.as_ref().ok_or_else(|| {
                    ProvisionError::Unsupported(format!("{} deploys require a file", kind))
                })?;
                self.run(&["build", "-t", target.as_str(), "-"], Some(file.content.clone()), log)
                    .await?;
            }
        }

        self.run(&["tag", target.as_str(), latest.as_str()], None, log).await?;
        self.push(&target, log).await?;
        self.push(&latest, log).await?;

        Ok(target)
    }
}

/// Spawns `command` and forwards its stdout, then its stderr, into the
/// event log. The child is killed and reaped if forwarding fails.
async fn stream_output(
    label: String,
    mut command: Command,
    input: Option<Vec<u8>>,
    log: &mut EventLogWriter,
) -> Result<(), ProvisionError> {
    let mut child = command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => Some(tokio::spawn(async move {
            // Dropping stdin at the end signals EOF to podman
            stdin.write_all(&bytes).await
        })),
        _ => None,
    };

    let stderr = child.stderr.take();
    let stderr_reader = tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text).await;
        }
        text
    });

    if let Err(err) = forward_stdout(&mut child, log).await {
        warn!("Streaming output of {} failed, killing it: {}", label, err);
        if let Err(kill_err) = child.kill().await {
            error!("Failed to kill {}: {}", label, kill_err);
        }
        if let Some(writer) = writer {
            writer.abort();
        }
        stderr_reader.abort();
        return Err(err);
    }

    let status = child.wait().await?;
    let stderr_text = stderr_reader.await.unwrap_or_default();
    let mut stdin_error = None;
    if let Some(writer) = writer {
        if let Ok(Err(err)) = writer.await {
            warn!("Writing stdin of {} failed: {}", label, err);
            stdin_error = Some(err.to_string());
        }
    }

    for line in stderr_text.lines() {
        log_line(log, line).await?;
    }

    if !status.success() {
        let exit_code = status.code().unwrap_or(-1);
        let mut message = format!("exit_code={}, stderr='{}'", exit_code, stderr_text.trim());
        if let Some(stdin_error) = stdin_error {
            message.push_str(&format!(", stdin='{}'", stdin_error));
        }
        error!("{} failed: {}", label, message);
        return Err(ProvisionError::Command {
            command: label,
            message,
        });
    }

    Ok(())
}

async fn forward_stdout(child: &mut Child, log: &mut EventLogWriter) -> Result<(), ProvisionError> {
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            log_line(log, &line).await?;
        }
    }
    Ok(())
}
