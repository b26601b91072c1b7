use anyhow::Context;
use tarmac_control::config::{Config, ProvisionerKind};
use tarmac_control::repository::Repositories;
use tarmac_control::{api, db, provision};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tarmac_control=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tarmac control plane...");

    let config = Config::from_env()?;
    config.validate()?;

    let repos = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Repositories::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Repositories::in_memory()
        }
    };

    if config.provisioner == ProvisionerKind::Podman {
        provision::podman::check_podman_available()
            .await
            .context("Podman provisioner selected but podman is unavailable")?;
    }
    let provisioner = provision::from_config(&config);
    tracing::info!("Using {} provisioner", provisioner.name());

    let state = api::AppState::new(
        &repos,
        provisioner,
        config.image_naming.clone(),
        &config.internal_app,
    );

    if let (Some(email), Some(token)) = (&config.admin_email, &config.admin_token) {
        state
            .users
            .seed_admin(email, token)
            .await
            .context("Failed to seed administrator")?;
    }

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
