//! Control plane configuration
//!
//! Defines the listen address, storage backend, provisioning backend and
//! image naming of the control plane, read from environment variables.

use std::net::SocketAddr;

use tarmac_core::domain::image::ImageNaming;

/// Provisioning backend selected at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionerKind {
    Fake,
    Podman,
}

impl ProvisionerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fake" => Some(ProvisionerKind::Fake),
            "podman" => Some(ProvisionerKind::Podman),
            _ => None,
        }
    }
}

/// Control plane configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind_addr: String,

    /// PostgreSQL URL; `None` selects the in-memory store
    pub database_url: Option<String>,

    pub provisioner: ProvisionerKind,

    /// Registry and namespace of application images
    pub image_naming: ImageNaming,

    /// App whose tokens act platform-wide
    pub internal_app: String,

    /// Administrator seeded at start-up
    pub admin_email: Option<String>,
    pub admin_token: Option<String>,
}

impl Config {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            provisioner: ProvisionerKind::Fake,
            image_naming: ImageNaming::default(),
            internal_app: "tarmac-dashboard".to_string(),
            admin_email: None,
            admin_token: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - TARMAC_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (unset: in-memory store)
    /// - TARMAC_PROVISIONER (fake | podman, default: fake)
    /// - TARMAC_REGISTRY (default: none)
    /// - TARMAC_IMAGE_NAMESPACE (default: tarmac)
    /// - TARMAC_INTERNAL_APP (default: tarmac-dashboard)
    /// - TARMAC_ADMIN_EMAIL / TARMAC_ADMIN_TOKEN (default: none)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let provisioner = match non_empty_var("TARMAC_PROVISIONER") {
            Some(value) => ProvisionerKind::parse(&value)
                .ok_or_else(|| anyhow::anyhow!("unknown TARMAC_PROVISIONER: {}", value))?,
            None => defaults.provisioner,
        };

        Ok(Self {
            bind_addr: non_empty_var("TARMAC_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: non_empty_var("DATABASE_URL"),
            provisioner,
            image_naming: ImageNaming {
                registry: non_empty_var("TARMAC_REGISTRY"),
                namespace: non_empty_var("TARMAC_IMAGE_NAMESPACE")
                    .unwrap_or(defaults.image_naming.namespace),
            },
            internal_app: non_empty_var("TARMAC_INTERNAL_APP").unwrap_or(defaults.internal_app),
            admin_email: non_empty_var("TARMAC_ADMIN_EMAIL"),
            admin_token: non_empty_var("TARMAC_ADMIN_TOKEN"),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("bind_addr must be a socket address, got {}", self.bind_addr);
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("database_url must start with postgres:// or postgresql://");
            }
        }

        if self.image_naming.namespace.is_empty() || self.image_naming.namespace.contains(':') {
            anyhow::bail!("image namespace must be non-empty and contain no ':'");
        }

        if self.internal_app.is_empty() {
            anyhow::bail!("internal_app cannot be empty");
        }

        match (&self.admin_email, &self.admin_token) {
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("TARMAC_ADMIN_EMAIL and TARMAC_ADMIN_TOKEN must be set together")
            }
            (Some(_), Some(token)) if token.len() < 16 => {
                anyhow::bail!("admin token must be at least 16 characters")
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
