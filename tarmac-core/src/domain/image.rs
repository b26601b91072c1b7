//! Image reference helpers

use serde::{Deserialize, Serialize};

/// Trailing version tag of an image reference, if it has one.
///
/// `registry:5000/tarmac/app-g1:v2` has tag `v2`; `registry:5000/tarmac/app-g1`
/// has none (the colon belongs to the registry host).
pub fn image_tag(reference: &str) -> Option<&str> {
    let (_, tag) = reference.rsplit_once(':')?;
    if tag.is_empty() || tag.contains('/') {
        None
    } else {
        Some(tag)
    }
}

/// Where application images live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageNaming {
    pub registry: Option<String>,
    pub namespace: String,
}

impl Default for ImageNaming {
    fn default() -> Self {
        Self {
            registry: None,
            namespace: "tarmac".to_string(),
        }
    }
}

impl ImageNaming {
    /// Repository of an application's images: `[registry/]namespace/app-<name>`
    pub fn app_repository(&self, app: &str) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}/app-{}", registry, self.namespace, app),
            None => format!("{}/app-{}", self.namespace, app),
        }
    }

    /// Reference of the `version`-th image built for `app`
    pub fn versioned(&self, app: &str, version: u64) -> String {
        format!("{}:v{}", self.app_repository(app), version)
    }

    /// Reduces a reference to its bare tag when it lives in the app's own
    /// repository; foreign references are returned unchanged.
    pub fn display_image<'a>(&self, app: &str, reference: &'a str) -> &'a str {
        let repository = self.app_repository(app);
        match reference.strip_prefix(repository.as_str()) {
            Some(rest) if rest.starts_with(':') => &rest[1..],
            _ => reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("repo/app:v1"), Some("v1"));
        assert_eq!(image_tag("localhost:5000/tarmac/app-g1:v12"), Some("v12"));
        assert_eq!(image_tag("localhost:5000/tarmac/app-g1"), None);
        assert_eq!(image_tag("nginx"), None);
    }

    #[test]
    fn test_app_repository() {
        let naming = ImageNaming {
            registry: Some("registry.local:5000".into()),
            namespace: "tarmac".into(),
        };
        assert_eq!(
            naming.app_repository("g1"),
            "registry.local:5000/tarmac/app-g1"
        );
        assert_eq!(naming.versioned("g1", 3), "registry.local:5000/tarmac/app-g1:v3");
        assert_eq!(ImageNaming::default().app_repository("g1"), "tarmac/app-g1");
    }

    #[test]
    fn test_display_image() {
        let naming = ImageNaming::default();
        assert_eq!(naming.display_image("g1", "tarmac/app-g1:v2"), "v2");
        assert_eq!(naming.display_image("g1", "tarmac/app-g10:v2"), "tarmac/app-g10:v2");
        assert_eq!(naming.display_image("g1", "nginx:latest"), "nginx:latest");
    }
}
