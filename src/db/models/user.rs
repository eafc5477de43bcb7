use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,

    /// Per-user kill switch; users who opted out never enter an audience.
    pub notifications_enabled: bool,

    pub created_at: NaiveDateTime,
}
