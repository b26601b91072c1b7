//! App Repository
//!
//! Handles all database operations related to applications and the images
//! deployed to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tarmac_core::domain::app::App;

use super::{AppRepository, StoreError};

pub struct PgAppRepository {
    pool: PgPool,
}

impl PgAppRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppRepository for PgAppRepository {
    async fn find(&self, name: &str) -> Result<Option<App>, StoreError> {
        let row = sqlx::query_as::<_, AppRow>(
            r#"
            SELECT name, platform, team_owner, teams, deploys, created_at
            FROM apps
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn insert(&self, app: &App) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO apps (name, platform, team_owner, teams, deploys, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&app.name)
        .bind(&app.platform)
        .bind(&app.team_owner)
        .bind(&app.teams)
        .bind(app.deploys as i64)
        .bind(app.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_teams(&self, teams: &[String]) -> Result<Vec<App>, StoreError> {
        let rows = sqlx::query_as::<_, AppRow>(
            r#"
            SELECT name, platform, team_owner, teams, deploys, created_at
            FROM apps
            WHERE team_owner = ANY($1) OR teams && $1
            ORDER BY name
            "#,
        )
        .bind(teams)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn increment_deploys(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE apps SET deploys = deploys + 1 WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn append_image(&self, name: &str, image: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO app_images (app_name, image, created_at) VALUES ($1, $2, $3)")
            .bind(name)
            .bind(image)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn image_history(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT image FROM app_images WHERE app_name = $1 ORDER BY id ASC")
                .bind(name)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(image,)| image).collect())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AppRow {
    name: String,
    platform: String,
    team_owner: String,
    teams: Vec<String>,
    deploys: i64,
    created_at: DateTime<Utc>,
}

impl From<AppRow> for App {
    fn from(row: AppRow) -> Self {
        App {
            name: row.name,
            platform: row.platform,
            team_owner: row.team_owner,
            teams: row.teams,
            deploys: row.deploys.max(0) as u64,
            created_at: row.created_at,
        }
    }
}
