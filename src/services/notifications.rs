use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{
    ChatRepository, CreateNotification, EventRepository, Notification, NotificationRepository,
    NotificationType, PushTokenRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::audience::{AudienceResolver, Trigger};
use crate::services::gateway::{
    classify_call_failure, classify_ticket, DeliveryOutcome, PushMessage,
};
use crate::AppState;

/// Change published on the notification feed when a record is created or
/// reaches a terminal status. Subscribers hold a broadcast receiver and
/// unsubscribe by dropping it.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationChange {
    pub kind: ChangeKind,
    pub notification_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Finalized,
}

/// What a dispatch pass decided for one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Sent,
    Failed,
    /// Stay pending; a later sweep retries the dispatch step.
    Retry,
}

/// Collapse per-token outcomes into a record-level verdict.
///
/// An empty outcome set means there was nothing to deliver, which counts
/// as sent. Any delivered token counts as sent. Otherwise a retryable
/// outcome keeps the record pending; only a set of purely permanent
/// failures marks it failed.
fn delivery_verdict(outcomes: &[DeliveryOutcome]) -> Verdict {
    if outcomes.is_empty() || outcomes.contains(&DeliveryOutcome::Delivered) {
        return Verdict::Sent;
    }
    if outcomes.iter().any(DeliveryOutcome::is_retryable) {
        return Verdict::Retry;
    }
    Verdict::Failed
}

/// Orchestrates the notification pipeline: audience resolution, record +
/// delivery-row writes, token lookup, gateway dispatch and status
/// finalization.
pub struct NotificationService {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl NotificationService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    /// Event-wide announcement to all confirmed attendees.
    ///
    /// `dedupe_key` is the caller's trigger identity; re-invocations with
    /// the same key return the existing notification instead of fanning
    /// out twice.
    pub async fn notify_event(
        &self,
        event_id: &str,
        title: &str,
        body: &str,
        created_by: &str,
        dedupe_key: Option<String>,
        ntype: NotificationType,
    ) -> AppResult<Notification> {
        let event = EventRepository::find_by_id(&self.pool, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;

        let trigger = Trigger::Event {
            event_id: event_id.to_string(),
            dedupe_key,
        };
        let mut data = serde_json::json!({
            "eventId": event_id,
            "eventTitle": event.title,
        });
        if let Some(location) = event.location() {
            data["locationName"] = serde_json::Value::String(location.name);
        }

        self.create_and_dispatch(trigger, ntype, title, body, Some(data), created_by)
            .await
    }

    /// New chat message: notify active thread members except the sender.
    /// The message id is the trigger identity, so webhook redelivery of the
    /// same message cannot duplicate the fan-out.
    pub async fn notify_thread_message(
        &self,
        thread_id: &str,
        message_id: &str,
        sender_id: &str,
        preview: &str,
    ) -> AppResult<Notification> {
        let thread = ChatRepository::find_thread(&self.pool, thread_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chat thread {} not found", thread_id)))?;

        let trigger = Trigger::ThreadMessage {
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            sender_id: sender_id.to_string(),
        };
        let data = serde_json::json!({ "threadId": thread_id, "messageId": message_id });

        self.create_and_dispatch(
            trigger,
            NotificationType::ChatMessage,
            &thread.title,
            preview,
            Some(data),
            sender_id,
        )
        .await
    }

    /// Direct addressing of an explicit recipient list.
    pub async fn notify_direct(
        &self,
        user_ids: Vec<String>,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
        created_by: &str,
        ntype: NotificationType,
    ) -> AppResult<Notification> {
        let trigger = Trigger::Direct { user_ids };
        self.create_and_dispatch(trigger, ntype, title, body, data, created_by)
            .await
    }

    /// Sweep entry point: claim due pending notifications and re-run the
    /// dispatch step for each. Returns the number of claimed records.
    /// With nothing pending this performs zero writes.
    pub async fn process_pending(&self) -> AppResult<usize> {
        let cfg = &self.state.config.sweep;
        let claimed =
            NotificationRepository::claim_pending(&self.pool, cfg.batch_size, cfg.claim_cooldown_seconds)
                .await?;
        let count = claimed.len();

        for notification in claimed {
            let id = notification.id.clone();
            if let Err(e) = self.dispatch(notification).await {
                tracing::warn!("Sweep dispatch for notification {} failed: {:?}", id, e);
            }
        }

        Ok(count)
    }

    /// Resolve the audience, write the notification with its delivery rows,
    /// then attempt push delivery. NotFound and persistence failures bubble
    /// to the caller before any push attempt; push failures never do.
    async fn create_and_dispatch(
        &self,
        trigger: Trigger,
        ntype: NotificationType,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
        created_by: &str,
    ) -> AppResult<Notification> {
        let audience = AudienceResolver::resolve(&self.pool, &trigger).await?;

        let input = CreateNotification {
            notification_type: ntype.as_str().to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: data.map(|v| v.to_string()),
            trigger_type: trigger.trigger_id().map(|_| trigger.trigger_type().to_string()),
            trigger_id: trigger.trigger_id(),
            created_by: created_by.to_string(),
        };

        let (notification, created) =
            NotificationRepository::create_with_recipients(&self.pool, input, &audience).await?;

        if !created {
            tracing::info!(
                "Duplicate trigger for notification {}; skipping fan-out",
                notification.id
            );
            return Ok(notification);
        }

        tracing::info!(
            "Created notification {} ({}) for {} recipient(s)",
            notification.id,
            notification.notification_type,
            audience.len()
        );
        self.publish(ChangeKind::Created, &notification);

        let notification =
            NotificationRepository::register_attempt(&self.pool, &notification.id).await?;
        self.dispatch(notification).await
    }

    /// Token lookup, gateway dispatch and finalization for one notification
    /// whose attempt has already been claimed.
    async fn dispatch(&self, notification: Notification) -> AppResult<Notification> {
        let recipients = NotificationRepository::recipients(&self.pool, &notification.id).await?;
        let user_ids: Vec<String> = recipients.into_iter().map(|r| r.user_id).collect();
        let tokens = PushTokenRepository::find_active_for_users(&self.pool, &user_ids).await?;

        if tokens.is_empty() {
            // No registered device anywhere in the audience. The delivery
            // rows remain queryable in-app; the record counts as sent.
            tracing::debug!(
                "Notification {}: no active tokens, nothing to deliver",
                notification.id
            );
            return self.finalize(notification, Verdict::Sent).await;
        }

        let mut data = notification
            .data
            .as_deref()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "notificationId".to_string(),
                serde_json::Value::String(notification.id.clone()),
            );
        }

        let messages: Vec<PushMessage> = tokens
            .iter()
            .map(|t| {
                PushMessage::new(
                    t.token.clone(),
                    notification.title.clone(),
                    notification.body.clone(),
                    data.clone(),
                )
            })
            .collect();

        let gateway = self.state.gateway.clone();
        let chunk_size = gateway.batch_size().max(1);
        let mut outcomes: Vec<DeliveryOutcome> = Vec::with_capacity(messages.len());

        for chunk in messages.chunks(chunk_size) {
            match gateway.send_batch(chunk).await {
                Ok(tickets) => {
                    if tickets.len() != chunk.len() {
                        tracing::warn!(
                            "Push gateway returned {} ticket(s) for {} message(s)",
                            tickets.len(),
                            chunk.len()
                        );
                    }
                    for i in 0..chunk.len() {
                        outcomes.push(
                            tickets
                                .get(i)
                                .map(classify_ticket)
                                .unwrap_or(DeliveryOutcome::Transient),
                        );
                    }
                }
                Err(e) => {
                    // Whole-call failure: classified per token, never thrown,
                    // so finalization still runs.
                    let outcome = classify_call_failure(&e);
                    tracing::warn!(
                        "Push gateway call failed for notification {}: {}",
                        notification.id,
                        e
                    );
                    outcomes.extend(std::iter::repeat(outcome).take(chunk.len()));
                }
            }
        }

        // Self-healing: tokens the gateway reported as permanently invalid
        // are deactivated so the next cycle skips them.
        let invalid: Vec<String> = tokens
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| **outcome == DeliveryOutcome::InvalidToken)
            .map(|(token, _)| token.token.clone())
            .collect();
        if !invalid.is_empty() {
            let flipped = PushTokenRepository::deactivate_tokens(&self.pool, &invalid).await?;
            tracing::info!(
                "Notification {}: deactivated {} invalid push token(s)",
                notification.id,
                flipped
            );
        }

        let mut verdict = delivery_verdict(&outcomes);
        if verdict == Verdict::Retry && notification.attempts >= self.state.config.sweep.max_attempts
        {
            tracing::warn!(
                "Notification {} exhausted {} dispatch attempt(s); marking failed",
                notification.id,
                notification.attempts
            );
            verdict = Verdict::Failed;
        }

        self.finalize(notification, verdict).await
    }

    /// Apply the verdict. Status only ever moves `pending -> sent` or
    /// `pending -> failed`; a retry verdict leaves the row pending for the
    /// next sweep. Read flags on delivery rows are never touched here.
    async fn finalize(&self, notification: Notification, verdict: Verdict) -> AppResult<Notification> {
        let updated = match verdict {
            Verdict::Sent => NotificationRepository::mark_sent(&self.pool, &notification.id).await?,
            Verdict::Failed => {
                NotificationRepository::mark_failed(&self.pool, &notification.id).await?
            }
            Verdict::Retry => {
                tracing::info!(
                    "Notification {} stays pending for the next sweep (attempt {})",
                    notification.id,
                    notification.attempts
                );
                None
            }
        };

        match updated {
            Some(finalized) => {
                tracing::info!(
                    "Notification {} finalized as {}",
                    finalized.id,
                    finalized.status
                );
                self.publish(ChangeKind::Finalized, &finalized);
                Ok(finalized)
            }
            None => Ok(notification),
        }
    }

    fn publish(&self, kind: ChangeKind, notification: &Notification) {
        // No receivers is fine; the feed is best-effort.
        let _ = self.state.changes.send(NotificationChange {
            kind,
            notification_id: notification.id.clone(),
            status: notification.status.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::gateway::{PushGateway, PushTicket};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    #[test]
    fn verdict_empty_outcomes_is_sent() {
        assert_eq!(delivery_verdict(&[]), Verdict::Sent);
    }

    #[test]
    fn verdict_any_delivered_is_sent() {
        let outcomes = [
            DeliveryOutcome::InvalidToken,
            DeliveryOutcome::Delivered,
            DeliveryOutcome::Transient,
        ];
        assert_eq!(delivery_verdict(&outcomes), Verdict::Sent);
    }

    #[test]
    fn verdict_transient_wins_over_invalid() {
        let outcomes = [DeliveryOutcome::InvalidToken, DeliveryOutcome::Transient];
        assert_eq!(delivery_verdict(&outcomes), Verdict::Retry);

        let outcomes = [DeliveryOutcome::RateLimited];
        assert_eq!(delivery_verdict(&outcomes), Verdict::Retry);
    }

    #[test]
    fn verdict_all_permanent_failures_is_failed() {
        let outcomes = [DeliveryOutcome::InvalidToken, DeliveryOutcome::InvalidToken];
        assert_eq!(delivery_verdict(&outcomes), Verdict::Failed);
    }

    // ------------------------------------------------------------------
    // Pipeline tests against an in-memory database and a scripted gateway
    // ------------------------------------------------------------------

    enum Script {
        Tickets(Vec<PushTicket>),
        CallFailure(String),
    }

    /// Gateway stub: pops one script entry per call, defaulting to
    /// all-delivered. Records every batch it receives.
    struct StubGateway {
        batch_size: usize,
        scripts: Mutex<VecDeque<Script>>,
        calls: Mutex<Vec<Vec<PushMessage>>>,
    }

    impl StubGateway {
        fn new(batch_size: usize) -> Self {
            Self {
                batch_size,
                scripts: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push_script(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        fn calls(&self) -> Vec<Vec<PushMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushGateway for StubGateway {
        async fn send_batch(&self, messages: &[PushMessage]) -> AppResult<Vec<PushTicket>> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Tickets(tickets)) => Ok(tickets),
                Some(Script::CallFailure(text)) => Err(AppError::Gateway(text)),
                None => Ok(vec![PushTicket::ok(); messages.len()]),
            }
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }
    }

    async fn test_state(gateway: Arc<StubGateway>) -> Arc<AppState> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let mut config = Config::default();
        // Tests drive the sweep directly; no cooldown between attempts.
        config.sweep.claim_cooldown_seconds = 0;

        let (changes, _) = broadcast::channel(64);
        Arc::new(AppState {
            db: pool,
            config,
            gateway,
            changes,
        })
    }

    async fn seed_user(pool: &SqlitePool, id: &str) {
        sqlx::query("INSERT INTO users (id, display_name) VALUES (?, ?)")
            .bind(id)
            .bind(format!("User {}", id))
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_event(pool: &SqlitePool, id: &str, title: &str) {
        sqlx::query("INSERT INTO events (id, title) VALUES (?, ?)")
            .bind(id)
            .bind(title)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_rsvp(pool: &SqlitePool, event_id: &str, user_id: &str, status: &str) {
        sqlx::query(
            "INSERT INTO event_rsvps (id, event_id, user_id, status) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(event_id)
        .bind(user_id)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_thread(pool: &SqlitePool, id: &str, title: &str) {
        sqlx::query("INSERT INTO chat_threads (id, title) VALUES (?, ?)")
            .bind(id)
            .bind(title)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_membership(pool: &SqlitePool, thread_id: &str, user_id: &str, active: bool) {
        sqlx::query(
            "INSERT INTO chat_memberships (id, thread_id, user_id, is_active) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(thread_id)
        .bind(user_id)
        .bind(active)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_token(pool: &SqlitePool, user_id: &str, token: &str) {
        sqlx::query(
            "INSERT INTO user_push_tokens (id, user_id, token, platform) VALUES (?, ?, ?, 'ios')",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(token)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn notification_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn active_token_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM user_push_tokens WHERE is_active = 1")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn event_announcement_fans_out_to_attendees() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["u1", "u2", "u3", "creator"] {
            seed_user(&pool, user).await;
        }
        seed_event(&pool, "e1", "Spring Meetup").await;
        seed_rsvp(&pool, "e1", "u1", "attending").await;
        seed_rsvp(&pool, "e1", "u2", "attending").await;
        seed_rsvp(&pool, "e1", "u3", "attending").await;
        // Only u1 has devices registered.
        seed_token(&pool, "u1", "tok-a").await;
        seed_token(&pool, "u1", "tok-b").await;

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_event(
                "e1",
                "Reminder",
                "Starts soon",
                "creator",
                None,
                NotificationType::EventUpdate,
            )
            .await
            .unwrap();

        assert_eq!(notification.status, "sent");
        assert!(notification.sent_at.is_some());

        let recipients = NotificationRepository::recipients(&pool, &notification.id)
            .await
            .unwrap();
        assert_eq!(recipients.len(), 3);
        let mut user_ids: Vec<String> = recipients.iter().map(|r| r.user_id.clone()).collect();
        user_ids.sort();
        assert_eq!(user_ids, vec!["u1", "u2", "u3"]);

        // One batch with the tokened user's two messages, carrying the
        // deep-link payload.
        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        for message in &calls[0] {
            assert_eq!(message.data["eventId"], "e1");
            assert_eq!(message.data["notificationId"], notification.id.as_str());
        }
    }

    #[tokio::test]
    async fn thread_message_excludes_sender() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b", "c"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_membership(&pool, "t1", "c", true).await;

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello everyone")
            .await
            .unwrap();

        let recipients = NotificationRepository::recipients(&pool, &notification.id)
            .await
            .unwrap();
        let mut user_ids: Vec<String> = recipients.iter().map(|r| r.user_id.clone()).collect();
        user_ids.sort();
        assert_eq!(user_ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn inactive_members_are_excluded() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b", "left"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_membership(&pool, "t1", "left", false).await;

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hi")
            .await
            .unwrap();

        let recipients = NotificationRepository::recipients(&pool, &notification.id)
            .await
            .unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].user_id, "b");
    }

    #[tokio::test]
    async fn chat_trigger_is_idempotent() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;

        let svc = NotificationService::new(&state);
        let first = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();
        let second = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(notification_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn missing_event_is_not_found_and_writes_nothing() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();
        seed_user(&pool, "creator").await;

        let svc = NotificationService::new(&state);
        let err = svc
            .notify_event(
                "missing",
                "Reminder",
                "Starts soon",
                "creator",
                None,
                NotificationType::EventUpdate,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(notification_count(&pool).await, 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_audience_still_creates_notification_as_sent() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        seed_user(&pool, "creator").await;
        seed_event(&pool, "e1", "Quiet Event").await;

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_event(
                "e1",
                "Update",
                "Venue changed",
                "creator",
                None,
                NotificationType::EventUpdate,
            )
            .await
            .unwrap();

        assert_eq!(notification.status, "sent");
        let recipients = NotificationRepository::recipients(&pool, &notification.id)
            .await
            .unwrap();
        assert!(recipients.is_empty());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn all_tokens_invalid_deactivates_and_fails() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_token(&pool, "b", "tok-1").await;
        seed_token(&pool, "b", "tok-2").await;

        gateway.push_script(Script::Tickets(vec![
            PushTicket::error("DeviceNotRegistered", "token gone"),
            PushTicket::error("DeviceNotRegistered", "token gone"),
        ]));

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        assert_eq!(notification.status, "failed");
        assert_eq!(active_token_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn transient_failure_leaves_pending_then_sweep_delivers() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_token(&pool, "b", "tok-1").await;

        gateway.push_script(Script::CallFailure(
            "Push gateway returned 502 Bad Gateway: ".to_string(),
        ));

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        // Transient failure: still pending, token untouched.
        assert_eq!(notification.status, "pending");
        assert!(notification.sent_at.is_none());
        assert_eq!(active_token_count(&pool).await, 1);

        // Next sweep retries the dispatch step and succeeds.
        let processed = svc.process_pending().await.unwrap();
        assert_eq!(processed, 1);
        let reloaded = NotificationRepository::find_by_id(&pool, &notification.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, "sent");

        // Nothing pending anymore: the following sweep claims nothing.
        let processed = svc.process_pending().await.unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn rate_limited_ticket_leaves_pending() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_token(&pool, "b", "tok-1").await;

        gateway.push_script(Script::Tickets(vec![PushTicket::error(
            "MessageRateLimitExceeded",
            "too many requests",
        )]));

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        assert_eq!(notification.status, "pending");
        assert_eq!(active_token_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn mixed_invalid_and_transient_keeps_pending_but_deactivates() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_token(&pool, "b", "tok-1").await;
        seed_token(&pool, "b", "tok-2").await;

        gateway.push_script(Script::Tickets(vec![
            PushTicket::error("DeviceNotRegistered", "token gone"),
            PushTicket::error("ServiceBusy", "try later"),
        ]));

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        assert_eq!(notification.status, "pending");
        assert_eq!(active_token_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn attempt_cap_finalizes_failed() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .unwrap();
            sqlx::migrate!("./migrations").run(&pool).await.unwrap();

            let mut config = Config::default();
            config.sweep.claim_cooldown_seconds = 0;
            config.sweep.max_attempts = 2;

            let (changes, _) = broadcast::channel(64);
            Arc::new(AppState {
                db: pool,
                config,
                gateway: gateway.clone(),
                changes,
            })
        };
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_token(&pool, "b", "tok-1").await;

        gateway.push_script(Script::CallFailure("connection reset".to_string()));
        gateway.push_script(Script::CallFailure("connection reset".to_string()));

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();
        assert_eq!(notification.status, "pending");

        // Second attempt hits the cap and gives up.
        let processed = svc.process_pending().await.unwrap();
        assert_eq!(processed, 1);
        let reloaded = NotificationRepository::find_by_id(&pool, &notification.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, "failed");
    }

    #[tokio::test]
    async fn large_audience_is_chunked() {
        let gateway = Arc::new(StubGateway::new(2));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;
        seed_token(&pool, "b", "tok-1").await;
        seed_token(&pool, "b", "tok-2").await;
        seed_token(&pool, "b", "tok-3").await;

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        assert_eq!(notification.status, "sent");
        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[1].len(), 1);
    }

    #[tokio::test]
    async fn change_feed_sees_created_and_finalized() {
        let gateway = Arc::new(StubGateway::new(100));
        let state = test_state(gateway.clone()).await;
        let pool = state.db.clone();

        for user in ["a", "b"] {
            seed_user(&pool, user).await;
        }
        seed_thread(&pool, "t1", "General").await;
        seed_membership(&pool, "t1", "a", true).await;
        seed_membership(&pool, "t1", "b", true).await;

        let mut rx = state.subscribe();

        let svc = NotificationService::new(&state);
        let notification = svc
            .notify_thread_message("t1", "m1", "a", "hello")
            .await
            .unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.kind, ChangeKind::Created);
        assert_eq!(created.notification_id, notification.id);
        assert_eq!(created.status, "pending");

        let finalized = rx.try_recv().unwrap();
        assert_eq!(finalized.kind, ChangeKind::Finalized);
        assert_eq!(finalized.status, "sent");
    }
}
