use sqlx::SqlitePool;

use crate::db::models::ChatThread;
use crate::error::{AppError, AppResult};

pub struct ChatRepository;

impl ChatRepository {
    pub async fn find_thread(pool: &SqlitePool, id: &str) -> AppResult<Option<ChatThread>> {
        let row = sqlx::query_as::<_, ChatThread>(
            "SELECT id, title, event_id, created_at FROM chat_threads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Active members of a thread who have notifications enabled. Members
    /// who left (is_active = 0) keep their row but drop out here.
    pub async fn active_member_ids(pool: &SqlitePool, thread_id: &str) -> AppResult<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT m.user_id
            FROM chat_memberships m
            JOIN users u ON u.id = m.user_id
            WHERE m.thread_id = ?
              AND m.is_active = 1
              AND u.notifications_enabled = 1
            "#,
        )
        .bind(thread_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}
