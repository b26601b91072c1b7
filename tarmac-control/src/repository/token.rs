//! Token Repository

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::{StoreError, TokenRepository, TokenSubject};

pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn insert(&self, token: &str, subject: &TokenSubject) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token, subject_type, subject, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token) DO UPDATE
            SET subject_type = EXCLUDED.subject_type, subject = EXCLUDED.subject
            "#,
        )
        .bind(token)
        .bind(subject.kind())
        .bind(subject.value())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<TokenSubject>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT subject_type, subject FROM tokens WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(kind, value)| TokenSubject::from_parts(&kind, value)))
    }
}
