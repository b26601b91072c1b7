use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create events table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            target_type VARCHAR(64) NOT NULL,
            target_value VARCHAR(255) NOT NULL,
            kind VARCHAR(255) NOT NULL,
            owner_type VARCHAR(20) NOT NULL,
            owner_name VARCHAR(255) NOT NULL,
            running BOOLEAN NOT NULL,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            start_custom_data JSONB NOT NULL DEFAULT 'null',
            end_custom_data JSONB NOT NULL DEFAULT 'null',
            other_custom_data JSONB NOT NULL DEFAULT 'null',
            log TEXT NOT NULL DEFAULT '',
            error TEXT NOT NULL DEFAULT '',
            remove_date TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one running event per target
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_running_target
        ON events(target_type, target_value)
        WHERE running
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_start_time ON events(start_time DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_target ON events(target_type, target_value, start_time DESC)",
    )
    .execute(pool)
    .await?;

    // Create apps table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS apps (
            name VARCHAR(64) PRIMARY KEY,
            platform VARCHAR(255) NOT NULL DEFAULT '',
            team_owner VARCHAR(255) NOT NULL,
            teams TEXT[] NOT NULL DEFAULT '{}',
            deploys BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_images (
            id BIGSERIAL PRIMARY KEY,
            app_name VARCHAR(64) NOT NULL REFERENCES apps(name) ON DELETE CASCADE,
            image TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_app_images_app ON app_images(app_name, id)")
        .execute(pool)
        .await?;

    // Create roles table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            name VARCHAR(255) PRIMARY KEY,
            context_type VARCHAR(20) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            schemes TEXT[] NOT NULL DEFAULT '{}',
            events TEXT[] NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create users and role assignment tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            email VARCHAR(255) PRIMARY KEY,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Assignments may outlive their role; those are reported as unresolved
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_roles (
            position BIGSERIAL PRIMARY KEY,
            email VARCHAR(255) NOT NULL REFERENCES users(email) ON DELETE CASCADE,
            role_name VARCHAR(255) NOT NULL,
            context_value VARCHAR(255) NOT NULL DEFAULT '',
            UNIQUE (email, role_name, context_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_roles_role ON user_roles(role_name)")
        .execute(pool)
        .await?;

    // Create tokens table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tokens (
            token VARCHAR(255) PRIMARY KEY,
            subject_type VARCHAR(20) NOT NULL,
            subject VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
