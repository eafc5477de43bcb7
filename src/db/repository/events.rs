use sqlx::SqlitePool;

use crate::db::models::Event;
use crate::error::{AppError, AppResult};

pub struct EventRepository;

impl EventRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Event>> {
        let row = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, title, description, location, starts_at, created_by, created_at
            FROM events
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Users confirmed as attending an event who have notifications enabled.
    /// Eligibility is filtered on the SQL side so the resolver never sees
    /// opted-out or declined users.
    pub async fn attending_user_ids(pool: &SqlitePool, event_id: &str) -> AppResult<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT r.user_id
            FROM event_rsvps r
            JOIN users u ON u.id = r.user_id
            WHERE r.event_id = ?
              AND r.status = 'attending'
              AND u.notifications_enabled = 1
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}
