//! Role Repository

use async_trait::async_trait;
use sqlx::PgPool;
use tarmac_core::domain::permission::{ContextType, Role};

use super::{RoleRepository, StoreError};

pub struct PgRoleRepository {
    pool: PgPool,
}

impl PgRoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleRepository for PgRoleRepository {
    async fn find(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT name, context_type, description, schemes, events FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn insert(&self, role: &Role) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO roles (name, context_type, description, schemes, events)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&role.name)
        .bind(role.context_type.as_str())
        .bind(&role.description)
        .bind(&role.scheme_names)
        .bind(&role.events)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_schemes(&self, name: &str, schemes: &[String]) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET schemes = schemes || ARRAY(
                SELECT s FROM unnest($2::text[]) WITH ORDINALITY AS t(s, n)
                WHERE NOT (s = ANY(schemes))
                ORDER BY n
            )
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(schemes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_event(&self, name: &str, event: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET events = CASE WHEN $2 = ANY(events) THEN events ELSE array_append(events, $2) END
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(event)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_event(&self, event: &str) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT name, context_type, description, schemes, events
            FROM roles
            WHERE $1 = ANY(events)
            ORDER BY name
            "#,
        )
        .bind(event)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RoleRow {
    name: String,
    context_type: String,
    description: String,
    schemes: Vec<String>,
    events: Vec<String>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            name: row.name,
            // Unknown types fall back to the narrowest scope
            context_type: ContextType::parse(&row.context_type).unwrap_or(ContextType::User),
            description: row.description,
            scheme_names: row.schemes,
            events: row.events,
        }
    }
}
