use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-recipient delivery/read-tracking row tied to one notification.
///
/// Created together with its owning notification, before any push attempt,
/// so a user with no working device still has a durable, queryable record.
/// At most one row per (notification_id, user_id).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserNotification {
    pub id: String,
    pub notification_id: String,
    pub user_id: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

/// Joined view of a delivery row with its owning notification, as served
/// by the per-user history endpoint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserNotificationView {
    /// Delivery row id (not the notification id).
    pub id: String,
    pub notification_id: String,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: Option<String>,
    pub status: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}
