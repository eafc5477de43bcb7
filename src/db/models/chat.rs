use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: String,
    pub title: String,
    /// Set when the thread belongs to an event's discussion.
    pub event_id: Option<String>,
    pub created_at: NaiveDateTime,
}

