use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::User;
use crate::error::{AppError, AppResult};

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, display_name, email, notifications_enabled, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Narrow an explicit recipient list to users that exist and have
    /// notifications enabled. Unknown ids are dropped silently.
    pub async fn filter_notifiable(
        pool: &SqlitePool,
        user_ids: &[String],
    ) -> AppResult<Vec<String>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM users WHERE notifications_enabled = 1 AND id IN (");
        let mut separated = builder.separated(", ");
        for user_id in user_ids {
            separated.push_bind(user_id);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_scalar::<String>()
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }
}
