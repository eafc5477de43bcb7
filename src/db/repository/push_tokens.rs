use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::{PushToken, RegisterPushToken};
use crate::error::{AppError, AppResult};

pub struct PushTokenRepository;

impl PushTokenRepository {
    /// Register a device token, re-activating it if the same (user, token)
    /// pair was registered before.
    pub async fn register(pool: &SqlitePool, input: RegisterPushToken) -> AppResult<PushToken> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, PushToken>(
            r#"
            INSERT INTO user_push_tokens (
                id, user_id, token, platform, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT (user_id, token) DO UPDATE SET
                platform = excluded.platform,
                is_active = 1,
                updated_at = excluded.updated_at
            RETURNING id, user_id, token, platform, is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.user_id)
        .bind(&input.token)
        .bind(&input.platform)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Deactivate one (user, token) registration. Returns false when the
    /// pair was never registered.
    pub async fn unregister(pool: &SqlitePool, user_id: &str, token: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE user_push_tokens SET is_active = 0, updated_at = ? WHERE user_id = ? AND token = ?",
        )
        .bind(now)
        .bind(user_id)
        .bind(token)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Active tokens for the given users. Users without an active token
    /// simply contribute no rows.
    pub async fn find_active_for_users(
        pool: &SqlitePool,
        user_ids: &[String],
    ) -> AppResult<Vec<PushToken>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, user_id, token, platform, is_active, created_at, updated_at \
             FROM user_push_tokens WHERE is_active = 1 AND user_id IN (",
        );
        let mut separated = builder.separated(", ");
        for user_id in user_ids {
            separated.push_bind(user_id);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<PushToken>()
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Deactivate tokens the gateway reported as permanently invalid.
    /// Idempotent; returns the number of rows flipped.
    pub async fn deactivate_tokens(pool: &SqlitePool, tokens: &[String]) -> AppResult<u64> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE user_push_tokens SET is_active = 0, updated_at = ");
        builder.push_bind(now);
        builder.push(" WHERE is_active = 1 AND token IN (");
        let mut separated = builder.separated(", ");
        for token in tokens {
            separated.push_bind(token);
        }
        separated.push_unseparated(")");

        let result = builder
            .build()
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
