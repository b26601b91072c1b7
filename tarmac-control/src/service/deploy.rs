//! Deploy Service
//!
//! Drives one deploy request from classification to finalization:
//! classify, authorize, lock, execute, close. Once the event is open every
//! path closes it exactly once before the error reaches the caller.

use std::sync::Arc;

use serde_json::json;
use tarmac_core::domain::app::App;
use tarmac_core::domain::deploy::{self, DeployFile, DeployOptions, DeployStartData};
use tarmac_core::domain::event::{Owner, Target};
use tarmac_core::domain::permission::Scheme;
use tarmac_core::domain::principal::Principal;
use tarmac_core::dto::deploy::{DeployRequest, RollbackRequest};
use uuid::Uuid;

use crate::auth::Caller;
use crate::provision::Provisioner;
use crate::repository::{AppRepository, Repositories, StoreError};
use crate::service::error::{ControlError, MISSING_DEPLOY_SOURCE};
use crate::service::event::{EventLogWriter, EventService, OpenEvent};
use crate::service::permission::PermissionEngine;
use crate::service::rollback::resolve_image;

/// Result of a successful deploy
#[derive(Debug, Clone, PartialEq)]
pub struct DeployOutcome {
    pub event_id: Uuid,
    pub image: String,
}

pub struct DeployDispatcher {
    apps: Arc<dyn AppRepository>,
    events: Arc<EventService>,
    provisioner: Arc<dyn Provisioner>,
}

impl DeployDispatcher {
    pub fn new(
        repos: &Repositories,
        events: Arc<EventService>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            apps: repos.apps.clone(),
            events,
            provisioner,
        }
    }

    /// Deploys `app_name` from an archive URL, an uploaded bundle, an image
    /// or a git push.
    pub async fn deploy(
        &self,
        app_name: &str,
        request: DeployRequest,
        file: Option<DeployFile>,
        caller: &Caller,
    ) -> Result<DeployOutcome, ControlError> {
        let app = self.find_app(app_name).await?;
        check_app_token(&app, &caller.principal)?;

        let (options, owner) = classify(request, file, &caller.principal)?;
        let scheme = PermissionEngine::scheme_for(&options);
        PermissionEngine::authorize(&caller.permissions, scheme, &app.contexts())?;

        self.run(&app, options, owner, scheme, caller).await
    }

    /// Rolls `app_name` back to a previously deployed image, given as a
    /// full reference or a bare version tag.
    pub async fn rollback(
        &self,
        app_name: &str,
        request: RollbackRequest,
        caller: &Caller,
    ) -> Result<DeployOutcome, ControlError> {
        let app = self.find_app(app_name).await?;
        check_app_token(&app, &caller.principal)?;

        if request.origin.trim() != "rollback" {
            return Err(ControlError::Validation(
                "rollback requires origin=rollback".to_string(),
            ));
        }
        let image = request.image.trim();
        if image.is_empty() {
            return Err(ControlError::Validation(
                "you must specify the image to roll back to".to_string(),
            ));
        }

        let options = DeployOptions {
            image: image.to_string(),
            rollback: true,
            origin: "rollback".to_string(),
            user: caller.principal.name().to_string(),
            ..Default::default()
        };
        let scheme = Scheme::APP_DEPLOY_ROLLBACK;
        PermissionEngine::authorize(&caller.permissions, scheme, &app.contexts())?;

        self.run(&app, options, caller.principal.owner(), scheme, caller)
            .await
    }

    /// Attaches a diff to the deploy currently running for `app_name`
    pub async fn save_diff(
        &self,
        app_name: &str,
        diff: &str,
        caller: &Caller,
    ) -> Result<Uuid, ControlError> {
        let app = self.find_app(app_name).await?;
        check_app_token(&app, &caller.principal)?;
        PermissionEngine::authorize(&caller.permissions, Scheme::APP_DEPLOY, &app.contexts())?;

        let event = self
            .events
            .find_running(&Target::app(&app.name))
            .await?
            .filter(|e| e.is_deploy())
            .ok_or_else(|| ControlError::NotFound("No deploy running for app.".to_string()))?;

        self.events
            .set_other_custom_data(event.id, json!({ "diff": diff }))
            .await?;
        tracing::debug!("Diff saved on deploy {} of {}", event.id, app.name);
        Ok(event.id)
    }

    async fn find_app(&self, name: &str) -> Result<App, ControlError> {
        self.apps
            .find(name)
            .await?
            .ok_or_else(|| ControlError::NotFound("App not found.".to_string()))
    }

    /// Locks the app, executes and finalizes
    async fn run(
        &self,
        app: &App,
        mut options: DeployOptions,
        owner: Owner,
        scheme: Scheme,
        caller: &Caller,
    ) -> Result<DeployOutcome, ControlError> {
        let start = DeployStartData::new(&app.name, &options);
        let start_custom_data = serde_json::to_value(&start).map_err(StoreError::from)?;

        let event = self
            .events
            .open(
                OpenEvent {
                    target: Target::app(&app.name),
                    kind: scheme,
                    owner,
                    start_custom_data,
                    allowed: app.contexts(),
                },
                &caller.permissions,
            )
            .await?;

        let mut log = self.events.log_writer(event.id);
        let result = self.execute(app, &mut options, &mut log).await;
        if let Err(err) = log.flush().await {
            tracing::warn!("Flushing log of event {} failed: {}", event.id, err);
        }

        self.finalize(app, options.rollback, event.id, result).await
    }

    async fn execute(
        &self,
        app: &App,
        options: &mut DeployOptions,
        log: &mut EventLogWriter,
    ) -> Result<String, ControlError> {
        if options.rollback {
            let history = self.apps.image_history(&app.name).await?;
            options.image = resolve_image(&history, &options.image)?;
            tracing::info!("Rolling back {} to {}", app.name, options.image);
        }

        tracing::info!(
            "Deploying {} with {} provisioner",
            app.name,
            self.provisioner.name()
        );
        Ok(self.provisioner.deploy(app, options, log).await?)
    }

    async fn finalize(
        &self,
        app: &App,
        rollback: bool,
        event_id: Uuid,
        result: Result<String, ControlError>,
    ) -> Result<DeployOutcome, ControlError> {
        match result {
            Ok(image) => {
                self.events
                    .close(event_id, None, json!({ "image": image }))
                    .await?;
                self.apps.increment_deploys(&app.name).await?;
                if !rollback {
                    self.apps.append_image(&app.name, &image).await?;
                }

                tracing::info!("Deploy {} of {} succeeded: {}", event_id, app.name, image);
                Ok(DeployOutcome { event_id, image })
            }
            Err(err) => {
                tracing::error!("Deploy {} of {} failed: {}", event_id, app.name, err);
                if let Err(close_err) = self
                    .events
                    .close(event_id, Some(err.to_string()), json!({}))
                    .await
                {
                    tracing::error!("Closing failed deploy {} failed: {}", event_id, close_err);
                }
                Err(err)
            }
        }
    }
}

/// Builds normalized deploy options and the event owner from a request.
///
/// `commit` and `user` only mean something coming from a git hook, so they
/// are honoured for application tokens and dropped for everyone else.
pub fn classify(
    request: DeployRequest,
    file: Option<DeployFile>,
    principal: &Principal,
) -> Result<(DeployOptions, Owner), ControlError> {
    let mut options = DeployOptions {
        image: request.image.trim().to_string(),
        archive_url: request.archive_url.trim().to_string(),
        file,
        build: request.build,
        message: request.message,
        user: principal.name().to_string(),
        ..Default::default()
    };
    if !options.has_source() {
        return Err(ControlError::Validation(MISSING_DEPLOY_SOURCE.to_string()));
    }

    let origin = request.origin.trim();
    if !origin.is_empty() && !deploy::is_valid_origin(origin) {
        return Err(ControlError::Validation(
            "Invalid deployment origin".to_string(),
        ));
    }

    let mut owner = principal.owner();
    if principal.is_app_token() && !request.commit.is_empty() {
        options.commit = request.commit;
        if !request.user.is_empty() {
            owner = Owner::user(&request.user);
            options.user = request.user;
        }
    }

    options.origin = if !options.image.is_empty() {
        "image".to_string()
    } else if !options.commit.is_empty() {
        "git".to_string()
    } else {
        origin.to_string()
    };

    Ok((options, owner))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// An application token may only act on its own app, unless it is internal
fn check_app_token(app: &App, principal: &Principal) -> Result<(), ControlError> {
    match principal {
        Principal::App {
            name,
            internal: false,
        } if name != &app.name => Err(ControlError::Unauthorized("invalid app token".to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarmac_core::domain::event::Event;
    use tarmac_core::domain::image::ImageNaming;
    use tarmac_core::domain::permission::{Context, Permission, PermissionSet};
    use tarmac_core::domain::principal::User;

    use crate::provision::FakeProvisioner;
    use crate::provision::fake::FAKE_IMAGE;
    use crate::service::event::DeployScope;

    struct Harness {
        dispatcher: DeployDispatcher,
        events: Arc<EventService>,
        provisioner: Arc<FakeProvisioner>,
        repos: Repositories,
    }

    async fn harness() -> Harness {
        let repos = Repositories::in_memory();
        repos.apps.insert(&App::new("g1", "ops")).await.unwrap();
        repos.apps.insert(&App::new("g2", "dev")).await.unwrap();

        let events = Arc::new(EventService::new(&repos, ImageNaming::default()));
        let provisioner = Arc::new(FakeProvisioner::new());
        let dispatcher = DeployDispatcher::new(&repos, events.clone(), provisioner.clone());

        Harness {
            dispatcher,
            events,
            provisioner,
            repos,
        }
    }

    fn admin() -> Caller {
        Caller {
            principal: Principal::User(User::new("admin@example.com")),
            permissions: PermissionSet::new(vec![Permission::new(Scheme::ALL, Context::global())]),
        }
    }

    fn app_token(name: &str, internal: bool) -> Caller {
        let principal = Principal::App {
            name: name.to_string(),
            internal,
        };
        let permissions = PermissionSet::new(vec![principal.self_permission()]);
        Caller {
            principal,
            permissions,
        }
    }

    fn archive() -> DeployRequest {
        DeployRequest {
            archive_url: "http://example.com/app.tar.gz".to_string(),
            ..Default::default()
        }
    }

    fn image(reference: &str) -> DeployRequest {
        DeployRequest {
            image: reference.to_string(),
            origin: "app-deploy".to_string(),
            ..Default::default()
        }
    }

    fn rollback_to(image: &str) -> RollbackRequest {
        RollbackRequest {
            image: image.to_string(),
            origin: "rollback".to_string(),
        }
    }

    async fn stored(h: &Harness, id: Uuid) -> Event {
        h.repos.events.find_by_id(id).await.unwrap().unwrap()
    }

    async fn deploys_of(h: &Harness, app: &str) -> u64 {
        h.repos.apps.find(app).await.unwrap().unwrap().deploys
    }

    async fn is_locked(h: &Harness, app: &str) -> bool {
        h.events
            .find_running(&Target::app(app))
            .await
            .unwrap()
            .is_some()
    }

    #[tokio::test]
    async fn test_archive_deploy_end_to_end() {
        let h = harness().await;

        let outcome = h
            .dispatcher
            .deploy("g1", archive(), None, &admin())
            .await
            .unwrap();

        assert_eq!(outcome.image, FAKE_IMAGE);
        assert_eq!(deploys_of(&h, "g1").await, 1);
        assert_eq!(
            h.repos.apps.image_history("g1").await.unwrap(),
            vec![FAKE_IMAGE.to_string()]
        );

        let event = stored(&h, outcome.event_id).await;
        assert!(!event.running);
        assert_eq!(event.kind, "app.deploy.archive-url");
        assert_eq!(event.owner, Owner::user("admin@example.com"));
        assert_eq!(event.log, "Archive deploy called\n");
        assert_eq!(event.end_custom_data, json!({ "image": FAKE_IMAGE }));
        assert_eq!(event.start_custom_data["kind"], "archive-url");
        assert_eq!(event.start_custom_data["user"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_image_deploy_records_requested_image() {
        let h = harness().await;

        let outcome = h
            .dispatcher
            .deploy("g1", image("nginx:1.27"), None, &admin())
            .await
            .unwrap();

        assert_eq!(outcome.image, "nginx:1.27");
        let event = stored(&h, outcome.event_id).await;
        assert_eq!(event.kind, "app.deploy.image");
        assert_eq!(event.start_custom_data["origin"], "image");
        assert_eq!(event.log, "Image deploy called\n");
    }

    #[tokio::test]
    async fn test_upload_with_build_uses_build_scheme() {
        let h = harness().await;
        let request = DeployRequest {
            build: true,
            origin: "drag-and-drop".to_string(),
            ..Default::default()
        };
        let file = DeployFile::new("app.tar.gz", vec![1; 32]);

        let outcome = h
            .dispatcher
            .deploy("g1", request, Some(file), &admin())
            .await
            .unwrap();

        let event = stored(&h, outcome.event_id).await;
        assert_eq!(event.kind, "app.deploy.build");
        assert_eq!(event.start_custom_data["filesize"], 32);
        assert_eq!(event.start_custom_data["origin"], "drag-and-drop");
    }

    #[tokio::test]
    async fn test_missing_source_opens_no_event() {
        let h = harness().await;

        let err = h
            .dispatcher
            .deploy("g1", DeployRequest::default(), None, &admin())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), MISSING_DEPLOY_SOURCE);
        assert!(h
            .repos
            .events
            .list(&Default::default())
            .await
            .unwrap()
            .is_empty());
        assert!(h.provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_origin_is_rejected() {
        let h = harness().await;
        let request = DeployRequest {
            origin: "ftp".to_string(),
            ..archive()
        };

        assert!(matches!(
            h.dispatcher.deploy("g1", request, None, &admin()).await,
            Err(ControlError::Validation(msg)) if msg == "Invalid deployment origin"
        ));
    }

    #[tokio::test]
    async fn test_unknown_app() {
        let h = harness().await;

        assert!(matches!(
            h.dispatcher.deploy("nope", archive(), None, &admin()).await,
            Err(ControlError::NotFound(msg)) if msg == "App not found."
        ));
    }

    #[tokio::test]
    async fn test_denied_deploy_opens_no_event() {
        let h = harness().await;
        let caller = Caller {
            principal: Principal::User(User::new("dev@example.com")),
            permissions: PermissionSet::new(vec![Permission::new(
                Scheme::APP_DEPLOY_IMAGE,
                Context::app("g1"),
            )]),
        };

        assert!(matches!(
            h.dispatcher.deploy("g1", archive(), None, &caller).await,
            Err(ControlError::PermissionDenied)
        ));
        assert!(!is_locked(&h, "g1").await);

        // The same grant is enough for an image deploy
        assert!(h
            .dispatcher
            .deploy("g1", image("nginx"), None, &caller)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_busy_app_is_locked() {
        let h = harness().await;
        let running = h
            .events
            .open(
                OpenEvent {
                    target: Target::app("g1"),
                    kind: Scheme::APP_DEPLOY_IMAGE,
                    owner: Owner::user("other@example.com"),
                    start_custom_data: json!({}),
                    allowed: vec![Context::app("g1")],
                },
                &admin().permissions,
            )
            .await
            .unwrap();

        match h.dispatcher.deploy("g1", archive(), None, &admin()).await {
            Err(ControlError::Locked { event_id, .. }) => assert_eq!(event_id, running.id),
            other => panic!("expected Locked, got {:?}", other),
        }
        assert!(h.provisioner.calls().is_empty());

        // Other apps are not affected
        assert!(h
            .dispatcher
            .deploy("g2", archive(), None, &admin())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_deploy_closes_event() {
        let h = harness().await;
        h.provisioner.prepare_failure("registry unreachable");

        let err = h
            .dispatcher
            .deploy("g1", archive(), None, &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Provision(_)));
        assert!(!is_locked(&h, "g1").await);
        assert_eq!(deploys_of(&h, "g1").await, 0);

        let events = h.repos.events.list(&Default::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].running);
        assert_eq!(events[0].error, "registry unreachable");
        assert_eq!(events[0].end_custom_data, json!({}));

        // The lock was released exactly once
        assert!(h
            .dispatcher
            .deploy("g1", archive(), None, &admin())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rollback_to_recorded_version() {
        let h = harness().await;
        for reference in ["tarmac/app-g1:v1", "tarmac/app-g1:v2"] {
            h.dispatcher
                .deploy("g1", image(reference), None, &admin())
                .await
                .unwrap();
        }

        let outcome = h
            .dispatcher
            .rollback("g1", rollback_to("v1"), &admin())
            .await
            .unwrap();

        assert_eq!(outcome.image, "tarmac/app-g1:v1");
        assert_eq!(deploys_of(&h, "g1").await, 3);
        assert_eq!(h.repos.apps.image_history("g1").await.unwrap().len(), 2);

        let event = stored(&h, outcome.event_id).await;
        assert_eq!(event.kind, "app.deploy.rollback");
        assert_eq!(event.log, "Rollback deploy called\n");
        assert_eq!(event.start_custom_data["rollback"], true);
        assert_eq!(event.start_custom_data["image"], "v1");
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_version_fails_the_event() {
        let h = harness().await;
        h.dispatcher
            .deploy("g1", image("tarmac/app-g1:v1"), None, &admin())
            .await
            .unwrap();

        let err = h
            .dispatcher
            .rollback("g1", rollback_to("v3"), &admin())
            .await
            .unwrap_err();
        assert!(matches!(&err, ControlError::InvalidVersion(v) if v == "v3"));
        assert!(!is_locked(&h, "g1").await);

        let deploys = h
            .events
            .list_deploys(&DeployScope::default(), &admin().permissions)
            .await
            .unwrap();
        assert_eq!(deploys.len(), 2);
        assert_eq!(deploys[0].error, "invalid version: \"v3\"");
        assert_eq!(deploys[0].origin, "rollback");
        assert_eq!(deploys_of(&h, "g1").await, 1);
    }

    #[tokio::test]
    async fn test_rollback_requires_origin_and_image() {
        let h = harness().await;

        let no_origin = RollbackRequest {
            image: "v1".to_string(),
            origin: String::new(),
        };
        assert!(matches!(
            h.dispatcher.rollback("g1", no_origin, &admin()).await,
            Err(ControlError::Validation(_))
        ));
        assert!(matches!(
            h.dispatcher.rollback("g1", rollback_to(" "), &admin()).await,
            Err(ControlError::Validation(_))
        ));
        assert!(h
            .repos
            .events
            .list(&Default::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rollback_needs_its_own_scheme() {
        let h = harness().await;
        h.dispatcher
            .deploy("g1", image("tarmac/app-g1:v1"), None, &admin())
            .await
            .unwrap();

        let deployer = Caller {
            principal: Principal::User(User::new("dev@example.com")),
            permissions: PermissionSet::new(vec![Permission::new(
                Scheme::APP_DEPLOY_IMAGE,
                Context::team("ops"),
            )]),
        };
        assert!(matches!(
            h.dispatcher.rollback("g1", rollback_to("v1"), &deployer).await,
            Err(ControlError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_app_token_commit_and_user_are_honoured() {
        let h = harness().await;
        let request = DeployRequest {
            commit: "abc123".to_string(),
            user: "fulano@example.com".to_string(),
            message: "fix login".to_string(),
            ..archive()
        };

        let outcome = h
            .dispatcher
            .deploy("g1", request, None, &app_token("g1", false))
            .await
            .unwrap();

        let event = stored(&h, outcome.event_id).await;
        assert_eq!(event.kind, "app.deploy.git");
        assert_eq!(event.owner, Owner::user("fulano@example.com"));
        assert_eq!(event.log, "Archive deploy called\n");
        assert_eq!(event.start_custom_data["commit"], "abc123");
        assert_eq!(event.start_custom_data["origin"], "git");
        assert_eq!(event.start_custom_data["user"], "fulano@example.com");
        assert_eq!(event.start_custom_data["message"], "fix login");
    }

    #[tokio::test]
    async fn test_user_token_commit_is_ignored() {
        let h = harness().await;
        let request = DeployRequest {
            commit: "abc123".to_string(),
            user: "fulano@example.com".to_string(),
            ..archive()
        };

        let outcome = h
            .dispatcher
            .deploy("g1", request, None, &admin())
            .await
            .unwrap();

        let event = stored(&h, outcome.event_id).await;
        assert_eq!(event.kind, "app.deploy.archive-url");
        assert_eq!(event.owner, Owner::user("admin@example.com"));
        assert_eq!(event.start_custom_data["commit"], "");
        assert_eq!(event.start_custom_data["origin"], "");
        assert_eq!(event.start_custom_data["user"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_app_token_scope() {
        let h = harness().await;

        assert!(matches!(
            h.dispatcher
                .deploy("g2", archive(), None, &app_token("g1", false))
                .await,
            Err(ControlError::Unauthorized(_))
        ));
        assert!(h
            .dispatcher
            .deploy("g2", archive(), None, &app_token("tarmac-dashboard", true))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_save_diff_on_running_deploy() {
        let h = harness().await;

        assert!(matches!(
            h.dispatcher.save_diff("g1", "+ x", &admin()).await,
            Err(ControlError::NotFound(_))
        ));

        let running = h
            .events
            .open(
                OpenEvent {
                    target: Target::app("g1"),
                    kind: Scheme::APP_DEPLOY_GIT,
                    owner: Owner::app("g1"),
                    start_custom_data: json!({ "app.name": "g1" }),
                    allowed: vec![Context::app("g1")],
                },
                &admin().permissions,
            )
            .await
            .unwrap();

        let id = h
            .dispatcher
            .save_diff("g1", "+ added line", &app_token("g1", false))
            .await
            .unwrap();
        assert_eq!(id, running.id);

        h.events
            .close(running.id, None, json!({ "image": FAKE_IMAGE }))
            .await
            .unwrap();
        let data = h
            .events
            .get_deploy(running.id, &admin().permissions)
            .await
            .unwrap();
        assert_eq!(data.diff, "+ added line");
    }

    #[test]
    fn test_classify_origin_label() {
        let user = Principal::User(User::new("dev@example.com"));

        let (options, _) = classify(image("nginx"), None, &user).unwrap();
        assert_eq!(options.origin, "image");

        let request = DeployRequest {
            origin: "app-deploy".to_string(),
            ..archive()
        };
        let (options, owner) = classify(request, None, &user).unwrap();
        assert_eq!(options.origin, "app-deploy");
        assert_eq!(owner, Owner::user("dev@example.com"));

        let app = Principal::App {
            name: "g1".to_string(),
            internal: false,
        };
        let request = DeployRequest {
            commit: "abc".to_string(),
            ..archive()
        };
        let (options, owner) = classify(request, None, &app).unwrap();
        assert_eq!(options.origin, "git");
        assert_eq!(options.user, "g1");
        assert_eq!(owner, Owner::app("g1"));
    }
}
