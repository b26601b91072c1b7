//! Event Repository
//!
//! PostgreSQL storage for events. The lock primitive is the partial unique
//! index `idx_events_running_target` on `(target_type, target_value)
//! WHERE running`: an insert that would create a second running event for a
//! target conflicts and inserts nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tarmac_core::domain::event::{Event, EventCompletion, Owner, OwnerType, Target};
use uuid::Uuid;

use super::{EventFilter, EventRepository, InsertOutcome, StoreError, WriteOutcome};

/// Attempts before giving up on observing the holder of a contended lock
const INSERT_ATTEMPTS: usize = 3;

const EVENT_COLUMNS: &str = r#"
    id, target_type, target_value, kind, owner_type, owner_name, running,
    start_time, end_time, start_custom_data, end_custom_data, other_custom_data,
    log, error, remove_date
"#;

pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes a finished event from a missing one after a write
    /// guarded by `running` touched no row.
    async fn missed_write(&self, id: Uuid) -> Result<WriteOutcome, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT running FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(_) => WriteOutcome::Finished,
            None => WriteOutcome::Missing,
        })
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn insert_if_idle(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        for attempt in 1..=INSERT_ATTEMPTS {
            // The outer SELECT reads the statement snapshot, so on conflict it
            // sees the running event unless that event committed after the
            // snapshot was taken. That case returns no row and is retried.
            let row: Option<(Uuid, bool)> = sqlx::query_as(
                r#"
                WITH inserted AS (
                    INSERT INTO events (
                        id, target_type, target_value, kind, owner_type, owner_name,
                        running, start_time, start_custom_data, end_custom_data,
                        other_custom_data, log, error
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, 'null', 'null', '', '')
                    ON CONFLICT (target_type, target_value) WHERE running DO NOTHING
                    RETURNING id
                )
                SELECT id, inserted FROM (
                    SELECT id, TRUE AS inserted FROM inserted
                    UNION ALL
                    SELECT id, FALSE AS inserted FROM events
                    WHERE target_type = $2 AND target_value = $3 AND running
                ) candidates
                ORDER BY inserted DESC
                LIMIT 1
                "#,
            )
            .bind(event.id)
            .bind(&event.target.target_type)
            .bind(&event.target.value)
            .bind(&event.kind)
            .bind(event.owner.owner_type.as_str())
            .bind(&event.owner.name)
            .bind(event.start_time)
            .bind(&event.start_custom_data)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some((_, true)) => return Ok(InsertOutcome::Inserted),
                Some((holder, false)) => return Ok(InsertOutcome::Locked(holder)),
                None => {
                    tracing::debug!(
                        "Lock holder for {} not visible on attempt {}, retrying",
                        event.target,
                        attempt
                    );
                }
            }
        }

        Err(StoreError::Contended(event.target.to_string()))
    }

    async fn append_log(&self, id: Uuid, text: &str) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query("UPDATE events SET log = log || $2 WHERE id = $1 AND running")
            .bind(id)
            .bind(text)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            Ok(WriteOutcome::Applied)
        } else {
            self.missed_write(id).await
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        completion: &EventCompletion,
    ) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET running = FALSE,
                end_time = $2,
                error = COALESCE($3, error),
                end_custom_data = CASE
                    WHEN jsonb_typeof($4) = 'null' THEN end_custom_data
                    WHEN jsonb_typeof($4) = 'object' AND jsonb_typeof(end_custom_data) = 'object'
                        THEN end_custom_data || $4
                    ELSE $4
                END
            WHERE id = $1 AND running
            "#,
        )
        .bind(id)
        .bind(completion.end_time)
        .bind(&completion.error)
        .bind(&completion.end_custom_data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(WriteOutcome::Applied)
        } else {
            self.missed_write(id).await
        }
    }

    async fn merge_other_custom_data(
        &self,
        id: Uuid,
        data: &serde_json::Value,
    ) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET other_custom_data = CASE
                WHEN jsonb_typeof($2) = 'null' THEN other_custom_data
                WHEN jsonb_typeof($2) = 'object' AND jsonb_typeof(other_custom_data) = 'object'
                    THEN other_custom_data || $2
                ELSE $2
            END
            WHERE id = $1 AND running
            "#,
        )
        .bind(id)
        .bind(data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(WriteOutcome::Applied)
        } else {
            self.missed_write(id).await
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let sql = format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS);
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn find_running(&self, target: &Target) -> Result<Option<Event>, StoreError> {
        let sql = format!(
            "SELECT {} FROM events WHERE target_type = $1 AND target_value = $2 AND running",
            EVENT_COLUMNS
        );
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(&target.target_type)
            .bind(&target.value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM events
            WHERE ($1::text IS NULL OR target_type = $1)
              AND ($2::text[] IS NULL OR target_value = ANY($2))
              AND ($3::text IS NULL OR $3 = '' OR kind = $3 OR kind LIKE $3 || '.%')
            ORDER BY start_time DESC
            LIMIT $4
            "#,
            EVENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(&filter.target_type)
            .bind(&filter.target_values)
            .bind(&filter.kind)
            .bind(filter.limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    target_type: String,
    target_value: String,
    kind: String,
    owner_type: String,
    owner_name: String,
    running: bool,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    start_custom_data: serde_json::Value,
    end_custom_data: serde_json::Value,
    other_custom_data: serde_json::Value,
    log: String,
    error: String,
    remove_date: Option<DateTime<Utc>>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            target: Target::new(row.target_type, row.target_value),
            kind: row.kind,
            owner: Owner {
                owner_type: OwnerType::parse(&row.owner_type).unwrap_or(OwnerType::User),
                name: row.owner_name,
            },
            running: row.running,
            start_time: row.start_time,
            end_time: row.end_time,
            start_custom_data: row.start_custom_data,
            end_custom_data: row.end_custom_data,
            other_custom_data: row.other_custom_data,
            log: row.log,
            error: row.error,
            remove_date: row.remove_date,
        }
    }
}
