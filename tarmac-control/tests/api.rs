//! Integration tests for the HTTP boundary, driven against the in-memory
//! store and the fake provisioner.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use tarmac_control::api::{AppState, create_router};
use tarmac_control::provision::FakeProvisioner;
use tarmac_control::repository::Repositories;
use tarmac_control::service::event::OpenEvent;
use tarmac_core::domain::event::{Owner, Target};
use tarmac_core::domain::image::ImageNaming;
use tarmac_core::domain::permission::{Context, Permission, PermissionSet, Scheme};

const ADMIN_TOKEN: &str = "admin-token-0123456789abcdef";
const BOUNDARY: &str = "tarmac-test-boundary";

struct TestApp {
    router: Router,
    state: AppState,
    provisioner: Arc<FakeProvisioner>,
}

async fn test_app() -> TestApp {
    let repos = Repositories::in_memory();
    let provisioner = Arc::new(FakeProvisioner::new());
    let state = AppState::new(
        &repos,
        provisioner.clone(),
        ImageNaming::default(),
        "tarmac-dashboard",
    );
    state
        .users
        .seed_admin("admin@example.com", ADMIN_TOKEN)
        .await
        .expect("failed to seed admin");

    TestApp {
        router: create_router(state.clone()),
        state,
        provisioner,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    path: &str,
    token: Option<&str>,
    content_type: Option<String>,
    body: Body,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("bearer {token}"));
    }
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }

    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn post_json(app: &TestApp, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        path,
        Some(token),
        Some("application/json".to_string()),
        Body::from(serde_json::to_vec(&body).unwrap()),
    )
    .await
}

async fn delete_json(app: &TestApp, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Method::DELETE,
        path,
        Some(token),
        Some("application/json".to_string()),
        Body::from(serde_json::to_vec(&body).unwrap()),
    )
    .await
}

async fn get_json(app: &TestApp, path: &str, token: &str) -> (StatusCode, Value) {
    send(app, Method::GET, path, Some(token), None, Body::empty()).await
}

fn multipart_body(fields: &[(&str, &str)], file: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(content) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"app.tar.gz\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn deploy(
    app: &TestApp,
    app_name: &str,
    token: &str,
    fields: &[(&str, &str)],
    file: Option<&[u8]>,
) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        &format!("/apps/{app_name}/deploy"),
        Some(token),
        Some(format!("multipart/form-data; boundary={BOUNDARY}")),
        Body::from(multipart_body(fields, file)),
    )
    .await
}

async fn create_app(app: &TestApp, name: &str, team: &str) {
    let (status, body) = post_json(
        app,
        "/apps",
        ADMIN_TOKEN,
        json!({ "name": name, "team_owner": team }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create app failed: {body:?}");
}

async fn create_user(app: &TestApp, email: &str) -> String {
    let (status, body) = post_json(app, "/users", ADMIN_TOKEN, json!({ "email": email })).await;
    assert_eq!(status, StatusCode::CREATED, "create user failed: {body:?}");
    body["token"].as_str().unwrap().to_string()
}

const ARCHIVE: (&str, &str) = ("archive-url", "http://example.com/app.tar.gz");

// =============================================================================
// Deploys
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let (status, _) = send(&app, Method::GET, "/health", None, None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_deploy_and_read_history() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;

    let (status, _) = get_json(&app, "/deploys?app=g1", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = deploy(&app, "g1", ADMIN_TOKEN, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::OK, "deploy failed: {body:?}");
    assert_eq!(body["image"], "app-image");
    let event_id = body["event_id"].as_str().unwrap().to_string();

    let (status, list) = get_json(&app, "/deploys?app=g1", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], event_id);
    assert_eq!(list[0]["image"], "app-image");
    assert_eq!(list[0]["user"], "admin@example.com");
    assert_eq!(list[0]["can_rollback"], true);

    let (status, single) = get_json(&app, &format!("/deploys/{event_id}"), ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["app"], "g1");
    assert_eq!(single["error"], "");

    let (status, _) = get_json(&app, &format!("/deploys/{}", Uuid::new_v4()), ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_deploy() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;

    let (status, body) = deploy(
        &app,
        "g1",
        ADMIN_TOKEN,
        &[("origin", "drag-and-drop"), ("build", "true")],
        Some(b"not really a tarball".as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "deploy failed: {body:?}");

    let (_, single) = get_json(
        &app,
        &format!("/deploys/{}", body["event_id"].as_str().unwrap()),
        ADMIN_TOKEN,
    )
    .await;
    assert_eq!(single["origin"], "drag-and-drop");
}

#[tokio::test]
async fn test_deploy_errors() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/apps/g1/deploy",
        None,
        Some(format!("multipart/form-data; boundary={BOUNDARY}")),
        Body::from(multipart_body(&[ARCHIVE], None)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = deploy(&app, "g1", "not-a-token", &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = deploy(&app, "g1", ADMIN_TOKEN, &[("origin", "app-deploy")], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "you must specify either the archive-url, a image url or upload a file"
    );

    let (status, body) = deploy(&app, "g1", ADMIN_TOKEN, &[ARCHIVE, ("origin", "ftp")], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid deployment origin");

    let (status, _) = deploy(&app, "nope", ADMIN_TOKEN, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_deploy_is_recorded() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;
    app.provisioner.prepare_failure("build exploded");

    let (status, body) = deploy(&app, "g1", ADMIN_TOKEN, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("build exploded"));

    let (_, list) = get_json(&app, "/deploys", ADMIN_TOKEN).await;
    assert_eq!(list[0]["error"], "build exploded");
    assert_eq!(list[0]["can_rollback"], false);

    let (status, _) = deploy(&app, "g1", ADMIN_TOKEN, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_locked_app_returns_conflict() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;

    let root = PermissionSet::new(vec![Permission::new(Scheme::ALL, Context::global())]);
    let running = app
        .state
        .events
        .open(
            OpenEvent {
                target: Target::app("g1"),
                kind: Scheme::APP_DEPLOY_IMAGE,
                owner: Owner::user("admin@example.com"),
                start_custom_data: json!({ "app.name": "g1" }),
                allowed: vec![Context::app("g1")],
            },
            &root,
        )
        .await
        .unwrap();

    let (status, body) = deploy(&app, "g1", ADMIN_TOKEN, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["event_id"], running.id.to_string());

    let (status, body) = post_json(
        &app,
        "/apps/g1/diff",
        ADMIN_TOKEN,
        json!({ "diff": "+ new line" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_id"], running.id.to_string());
}

#[tokio::test]
async fn test_rollback() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;
    for image in ["tarmac/app-g1:v1", "tarmac/app-g1:v2"] {
        let (status, _) = deploy(&app, "g1", ADMIN_TOKEN, &[("image", image)], None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = post_json(
        &app,
        "/apps/g1/deploy/rollback",
        ADMIN_TOKEN,
        json!({ "image": "v1", "origin": "rollback" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "rollback failed: {body:?}");
    assert_eq!(body["image"], "tarmac/app-g1:v1");

    let (status, body) = post_json(
        &app,
        "/apps/g1/deploy/rollback",
        ADMIN_TOKEN,
        json!({ "image": "v3", "origin": "rollback" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid version: \"v3\"");

    let (_, list) = get_json(&app, "/deploys?app=g1", ADMIN_TOKEN).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 4);
    assert_eq!(list[0]["error"], "invalid version: \"v3\"");
    assert_eq!(list[1]["image"], "v1");
    assert_eq!(list[1]["origin"], "rollback");

    let (status, _) = post_json(
        &app,
        "/apps/g1/diff",
        ADMIN_TOKEN,
        json!({ "diff": "+ late" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Tokens, users and roles
// =============================================================================

#[tokio::test]
async fn test_app_token_git_deploy() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;
    create_app(&app, "g2", "ops").await;

    let (status, body) = post_json(&app, "/apps/g1/tokens", ADMIN_TOKEN, json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();

    let fields = [
        ARCHIVE,
        ("commit", "abc123"),
        ("user", "fulano@example.com"),
        ("message", "fix login"),
    ];
    let (status, body) = deploy(&app, "g1", &token, &fields, None).await;
    assert_eq!(status, StatusCode::OK, "deploy failed: {body:?}");

    let (_, single) = get_json(
        &app,
        &format!("/deploys/{}", body["event_id"].as_str().unwrap()),
        ADMIN_TOKEN,
    )
    .await;
    assert_eq!(single["commit"], "abc123");
    assert_eq!(single["origin"], "git");
    assert_eq!(single["user"], "fulano@example.com");

    let (status, _) = deploy(&app, "g2", &token, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_grants_deploy() {
    let app = test_app().await;
    create_app(&app, "g1", "ops").await;
    let dev = create_user(&app, "dev@example.com").await;

    let (status, _) = deploy(&app, "g1", &dev, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post_json(
        &app,
        "/roles",
        ADMIN_TOKEN,
        json!({ "name": "deployer", "context_type": "app" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, role) = post_json(
        &app,
        "/roles/deployer/permissions",
        ADMIN_TOKEN,
        json!({ "schemes": ["app.deploy"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(role["scheme_names"], json!(["app.deploy"]));

    let (status, _) = post_json(
        &app,
        "/roles/deployer/permissions",
        ADMIN_TOKEN,
        json!({ "schemes": ["app.teleport"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let assignment = json!({ "email": "dev@example.com", "context_value": "g1" });
    let (status, _) = post_json(&app, "/roles/deployer/users", ADMIN_TOKEN, assignment.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = deploy(&app, "g1", &dev, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::OK);

    // Deploying does not imply reading deploy history
    let (status, _) = get_json(&app, "/deploys", &dev).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = delete_json(&app, "/roles/deployer/users", ADMIN_TOKEN, assignment).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = deploy(&app, "g1", &dev, &[ARCHIVE], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_cannot_create_users() {
    let app = test_app().await;
    let dev = create_user(&app, "dev@example.com").await;

    let (status, body) = post_json(&app, "/users", &dev, json!({ "email": "x@example.com" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You don't have permission to do this action");

    let (status, _) = post_json(&app, "/users", ADMIN_TOKEN, json!({ "email": "dev@example.com" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
