use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateNotification, Notification, UserNotification, UserNotificationView};
use crate::error::{AppError, AppResult};

const NOTIFICATION_COLUMNS: &str = r#"
    id,
    notification_type,
    title,
    body,
    data,
    status,
    trigger_type,
    trigger_id,
    created_by,
    attempts,
    last_attempt_at,
    sent_at,
    created_at
"#;

/// Repository for notification records and their per-recipient delivery rows.
///
/// Implementation notes:
/// - Creation is all-or-nothing: the notification row and every recipient
///   row are inserted in one transaction, so readers never observe a
///   notification without its delivery rows.
/// - Sweep claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id = (SELECT id FROM ... LIMIT 1) RETURNING ...`
///   This avoids a long-lived transaction and reduces contention on SQLite.
pub struct NotificationRepository;

impl NotificationRepository {
    /// Create a notification together with one delivery row per recipient.
    ///
    /// Idempotent per (`trigger_type`, `trigger_id`): when a record for the
    /// same trigger already exists it is returned unchanged and nothing is
    /// written. The boolean in the result is `true` when a new record was
    /// created.
    pub async fn create_with_recipients(
        pool: &SqlitePool,
        input: CreateNotification,
        audience: &[String],
    ) -> AppResult<(Notification, bool)> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        if let (Some(trigger_type), Some(trigger_id)) = (&input.trigger_type, &input.trigger_id) {
            let existing = sqlx::query_as::<_, Notification>(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE trigger_type = ? AND trigger_id = ?"
            ))
            .bind(trigger_type)
            .bind(trigger_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::Database)?;

            if let Some(notification) = existing {
                tx.rollback().await.map_err(AppError::Database)?;
                return Ok((notification, false));
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let inserted = sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications (
                id,
                notification_type,
                title,
                body,
                data,
                status,
                trigger_type,
                trigger_id,
                created_by,
                attempts,
                last_attempt_at,
                sent_at,
                created_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?, 0, NULL, NULL, ?)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&input.notification_type)
        .bind(&input.title)
        .bind(&input.body)
        .bind(&input.data)
        .bind(&input.trigger_type)
        .bind(&input.trigger_id)
        .bind(&input.created_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let notification = match inserted {
            Ok(notification) => notification,
            // Concurrent invocation for the same trigger lost the race on the
            // uniqueness constraint: hand back the winner's record.
            Err(sqlx::Error::Database(db_err))
                if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                tx.rollback().await.map_err(AppError::Database)?;
                if let (Some(trigger_type), Some(trigger_id)) =
                    (&input.trigger_type, &input.trigger_id)
                {
                    if let Some(existing) =
                        Self::find_by_trigger(pool, trigger_type, trigger_id).await?
                    {
                        return Ok((existing, false));
                    }
                }
                return Err(AppError::Conflict(
                    "Notification for this trigger already exists".to_string(),
                ));
            }
            Err(e) => return Err(AppError::Database(e)),
        };

        for user_id in audience {
            let row_id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO user_notifications (
                    id, notification_id, user_id, is_read, created_at
                ) VALUES (?, ?, ?, 0, ?)
                "#,
            )
            .bind(&row_id)
            .bind(&id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;
        }

        tx.commit().await.map_err(AppError::Database)?;

        Ok((notification, true))
    }

    pub async fn find_by_trigger(
        pool: &SqlitePool,
        trigger_type: &str,
        trigger_id: &str,
    ) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE trigger_type = ? AND trigger_id = ?"
        ))
        .bind(trigger_type)
        .bind(trigger_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Stamp a dispatch attempt on a single notification. Returns the
    /// updated row with its incremented attempt counter.
    pub async fn register_attempt(pool: &SqlitePool, id: &str) -> AppResult<Notification> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET attempts = attempts + 1, last_attempt_at = ?
            WHERE id = ?
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Claim up to `limit` pending notifications for a sweep pass.
    ///
    /// Each claim is a single-statement UPDATE that increments the attempt
    /// counter and stamps `last_attempt_at`, so an overlapping sweep skips
    /// rows claimed inside the cooldown window. No long transaction is held.
    pub async fn claim_pending(
        pool: &SqlitePool,
        limit: i64,
        claim_cooldown_seconds: i64,
    ) -> AppResult<Vec<Notification>> {
        let mut claimed: Vec<Notification> = Vec::new();
        if limit <= 0 {
            return Ok(claimed);
        }

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();
            let cutoff = now - chrono::Duration::seconds(claim_cooldown_seconds);

            let opt = sqlx::query_as::<_, Notification>(&format!(
                r#"
                UPDATE notifications
                SET attempts = attempts + 1, last_attempt_at = ?
                WHERE id = (
                    SELECT id FROM notifications
                    WHERE status = 'pending'
                      AND (last_attempt_at IS NULL OR last_attempt_at <= ?)
                    ORDER BY created_at ASC
                    LIMIT 1
                )
                RETURNING {NOTIFICATION_COLUMNS}
                "#
            ))
            .bind(now)
            .bind(cutoff)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            if let Some(notification) = opt {
                claimed.push(notification);
            } else {
                break;
            }
        }

        Ok(claimed)
    }

    /// Transition `pending -> sent` and stamp `sent_at`. A record that
    /// already reached a terminal status is left untouched.
    pub async fn mark_sent(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET status = 'sent', sent_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Transition `pending -> failed`. Terminal records are left untouched.
    pub async fn mark_failed(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications
            SET status = 'failed'
            WHERE id = ? AND status = 'pending'
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Delivery rows owned by a notification (the resolved audience as it
    /// was persisted at creation time).
    pub async fn recipients(
        pool: &SqlitePool,
        notification_id: &str,
    ) -> AppResult<Vec<UserNotification>> {
        let rows = sqlx::query_as::<_, UserNotification>(
            r#"
            SELECT id, notification_id, user_id, is_read, created_at
            FROM user_notifications
            WHERE notification_id = ?
            "#,
        )
        .bind(notification_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Paginated per-user history, newest first, with an optional status filter.
    pub async fn find_for_user(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
        offset: i64,
        status: Option<&str>,
    ) -> AppResult<Vec<UserNotificationView>> {
        let rows = sqlx::query_as::<_, UserNotificationView>(
            r#"
            SELECT
                un.id,
                un.notification_id,
                n.notification_type,
                n.title,
                n.body,
                n.data,
                n.status,
                un.is_read,
                un.created_at
            FROM user_notifications un
            JOIN notifications n ON n.id = un.notification_id
            WHERE un.user_id = ?
              AND (? IS NULL OR n.status = ?)
            ORDER BY un.created_at DESC
            LIMIT ?
            OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn count_for_user(
        pool: &SqlitePool,
        user_id: &str,
        status: Option<&str>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM user_notifications un
            JOIN notifications n ON n.id = un.notification_id
            WHERE un.user_id = ?
              AND (? IS NULL OR n.status = ?)
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Read receipt: flip `is_read` on one (notification, user) pair.
    /// Returns false when no such delivery row exists.
    pub async fn mark_read(
        pool: &SqlitePool,
        notification_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE user_notifications SET is_read = 1 WHERE notification_id = ? AND user_id = ?",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
