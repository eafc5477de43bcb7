use std::collections::BTreeSet;

use sqlx::SqlitePool;

use crate::db::{ChatRepository, EventRepository, UserRepository};
use crate::error::{AppError, AppResult};

/// The domain event that initiates the pipeline.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Event-wide announcement, broadcast to all confirmed RSVPs.
    /// `dedupe_key` carries the caller's trigger identity; without one the
    /// announcement is not idempotence-guarded.
    Event {
        event_id: String,
        dedupe_key: Option<String>,
    },
    /// New chat message, broadcast to active thread members except the sender.
    ThreadMessage {
        thread_id: String,
        message_id: String,
        sender_id: String,
    },
    /// Direct addressing of an explicit recipient list.
    Direct { user_ids: Vec<String> },
}

impl Trigger {
    pub fn trigger_type(&self) -> &'static str {
        match self {
            Trigger::Event { .. } => "event",
            Trigger::ThreadMessage { .. } => "chat_message",
            Trigger::Direct { .. } => "direct",
        }
    }

    /// The trigger identity used for idempotent notification creation.
    pub fn trigger_id(&self) -> Option<String> {
        match self {
            Trigger::Event { dedupe_key, .. } => dedupe_key.clone(),
            Trigger::ThreadMessage { message_id, .. } => Some(message_id.clone()),
            Trigger::Direct { .. } => None,
        }
    }
}

/// Computes the set of recipient user ids for a trigger.
///
/// Eligibility (active membership / attending RSVP / notifications enabled)
/// is filtered on the SQL side; the resolver collapses duplicates and
/// excludes the message author for chat triggers. A dangling event or
/// thread reference fails with NotFound before anything is written.
pub struct AudienceResolver;

impl AudienceResolver {
    pub async fn resolve(pool: &SqlitePool, trigger: &Trigger) -> AppResult<Vec<String>> {
        let user_ids = match trigger {
            Trigger::Event { event_id, .. } => {
                if EventRepository::find_by_id(pool, event_id).await?.is_none() {
                    return Err(AppError::NotFound(format!("Event {} not found", event_id)));
                }
                EventRepository::attending_user_ids(pool, event_id).await?
            }
            Trigger::ThreadMessage {
                thread_id,
                sender_id,
                ..
            } => {
                if ChatRepository::find_thread(pool, thread_id).await?.is_none() {
                    return Err(AppError::NotFound(format!(
                        "Chat thread {} not found",
                        thread_id
                    )));
                }
                ChatRepository::active_member_ids(pool, thread_id)
                    .await?
                    .into_iter()
                    .filter(|id| id != sender_id)
                    .collect()
            }
            Trigger::Direct { user_ids } => UserRepository::filter_notifiable(pool, user_ids).await?,
        };

        // Collapse duplicates; an empty audience is a valid result.
        let set: BTreeSet<String> = user_ids.into_iter().collect();
        Ok(set.into_iter().collect())
    }
}
