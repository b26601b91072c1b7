//! User Repository
//!
//! Users live in `users`; role assignments live in `user_roles`, ordered by
//! their insertion position.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tarmac_core::domain::permission::RoleInstance;
use tarmac_core::domain::principal::User;

use super::{StoreError, UserRepository};

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, email: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// Loads the users named by `emails` (in that order) with their roles
    async fn load(&self, emails: Vec<String>) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRoleRow>(
            r#"
            SELECT email, role_name, context_value
            FROM user_roles
            WHERE email = ANY($1)
            ORDER BY position ASC
            "#,
        )
        .bind(&emails)
        .fetch_all(&self.pool)
        .await?;

        let mut roles: HashMap<String, Vec<RoleInstance>> = HashMap::new();
        for row in rows {
            roles
                .entry(row.email)
                .or_default()
                .push(RoleInstance::new(row.role_name, row.context_value));
        }

        Ok(emails
            .into_iter()
            .map(|email| {
                let roles = roles.remove(&email).unwrap_or_default();
                User { email, roles }
            })
            .collect())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find(&self, email: &str) -> Result<Option<User>, StoreError> {
        if !self.exists(email).await? {
            return Ok(None);
        }
        let mut users = self.load(vec![email.to_string()]).await?;
        Ok(users.pop())
    }

    async fn insert(&self, user: &User) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO users (email, created_at) VALUES ($1, $2) ON CONFLICT (email) DO NOTHING",
        )
        .bind(&user.email)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        for role in &user.roles {
            sqlx::query(
                r#"
                INSERT INTO user_roles (email, role_name, context_value)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&user.email)
            .bind(&role.name)
            .bind(&role.context_value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let emails: Vec<(String,)> = sqlx::query_as("SELECT email FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        self.load(emails.into_iter().map(|(e,)| e).collect()).await
    }

    async fn delete(&self, email: &str) -> Result<bool, StoreError> {
        // user_roles rows go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_role(&self, email: &str, role: &RoleInstance) -> Result<bool, StoreError> {
        if !self.exists(email).await? {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO user_roles (email, role_name, context_value)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(email)
        .bind(&role.name)
        .bind(&role.context_value)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    async fn remove_role(&self, email: &str, role: &RoleInstance) -> Result<bool, StoreError> {
        if !self.exists(email).await? {
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM user_roles WHERE email = $1 AND role_name = $2 AND context_value = $3",
        )
        .bind(email)
        .bind(&role.name)
        .bind(&role.context_value)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    async fn remove_role_from_all(&self, role: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE role_name = $1")
            .bind(role)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_with_role(&self, role: &str) -> Result<Vec<User>, StoreError> {
        let emails: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT u.email FROM users u
            WHERE EXISTS (
                SELECT 1 FROM user_roles r WHERE r.email = u.email AND r.role_name = $1
            )
            ORDER BY u.created_at
            "#,
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        self.load(emails.into_iter().map(|(e,)| e).collect()).await
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct UserRoleRow {
    email: String,
    role_name: String,
    context_value: String,
}
