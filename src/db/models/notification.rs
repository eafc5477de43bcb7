use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Types of notifications the pipeline produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    EventUpdate,
    ChatMessage,
    NewThread,
    ScheduledReminder,
    Direct,
}

impl NotificationType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event_update" => Some(NotificationType::EventUpdate),
            "chat_message" => Some(NotificationType::ChatMessage),
            "new_thread" => Some(NotificationType::NewThread),
            "scheduled_reminder" => Some(NotificationType::ScheduledReminder),
            "direct" => Some(NotificationType::Direct),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::EventUpdate => "event_update",
            NotificationType::ChatMessage => "chat_message",
            NotificationType::NewThread => "new_thread",
            NotificationType::ScheduledReminder => "scheduled_reminder",
            NotificationType::Direct => "direct",
        }
    }
}

/// One persisted record of an event worth telling users about.
///
/// Status moves `pending -> sent` or `pending -> failed` and never reverts.
/// The (`trigger_type`, `trigger_id`) pair is unique so a re-delivered domain
/// event (webhook retry, double submit) maps back onto the same record
/// instead of fanning out twice.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    /// Primary key (UUID)
    pub id: String,

    /// Notification type (e.g. 'event_update', 'chat_message', ...)
    pub notification_type: String,

    pub title: String,
    pub body: String,

    /// JSON-serialized deep-link payload attached to every push message
    /// (notification id plus any domain ids such as event_id / thread_id).
    pub data: Option<String>,

    /// 'pending', 'sent', 'failed'
    pub status: String,

    /// Idempotence key: the domain event that caused this notification.
    pub trigger_type: Option<String>,
    pub trigger_id: Option<String>,

    /// User who initiated the trigger (references `users.id`)
    pub created_by: String,

    /// Number of dispatch attempts already made (initial send + sweeps).
    pub attempts: i64,

    /// When the last dispatch attempt was claimed. Used as the sweep's
    /// claim marker so overlapping sweeps skip fresh rows.
    pub last_attempt_at: Option<NaiveDateTime>,

    /// Set once when the record transitions to 'sent'.
    pub sent_at: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
}

/// Data required to create a new notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotification {
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: Option<String>,
    pub trigger_type: Option<String>,
    pub trigger_id: Option<String>,
    pub created_by: String,
}
