use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{NotificationRepository, NotificationType};
use crate::error::{AppError, AppResult};
use crate::services::notifications::NotificationService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/event", post(trigger_event))
        .route("/thread-message", post(trigger_thread_message))
        .route("/direct", post(trigger_direct))
        .route("/process", post(run_sweep))
        .route("/:id/read", post(mark_read))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub user_id: String,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsListResponse {
    pub items: Vec<UserNotificationResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct UserNotificationResponse {
    pub id: String,
    pub notification_id: String,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub status: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<crate::db::Notification> for NotificationResponse {
    fn from(n: crate::db::Notification) -> Self {
        NotificationResponse {
            id: n.id,
            notification_type: n.notification_type,
            title: n.title,
            body: n.body,
            status: n.status,
            sent_at: n.sent_at,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TriggerEventRequest {
    pub event_id: String,
    pub title: String,
    pub body: String,
    pub created_by: String,
    /// Trigger identity for idempotent re-invocation; optional.
    pub dedupe_key: Option<String>,
    /// 'event_update' (default) or 'scheduled_reminder'.
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerThreadMessageRequest {
    pub thread_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub preview: String,
}

#[derive(Debug, Deserialize)]
pub struct TriggerDirectRequest {
    pub user_ids: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub created_by: String,
    /// 'direct' (default), 'new_thread' or 'scheduled_reminder'.
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub processed: usize,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: bool,
}

fn parse_kind(
    raw: Option<&str>,
    default: NotificationType,
    allowed: &[NotificationType],
) -> AppResult<NotificationType> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let kind = NotificationType::parse(raw)
        .filter(|k| allowed.contains(k))
        .ok_or_else(|| AppError::Validation(format!("Unsupported notification kind: {}", raw)))?;
    Ok(kind)
}

// ============================================================================
// Handlers
// ============================================================================

/// List notification history for one user
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<NotificationsListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let rows = NotificationRepository::find_for_user(
        &state.db,
        &query.user_id,
        per_page,
        offset,
        query.status.as_deref(),
    )
    .await?;

    let total =
        NotificationRepository::count_for_user(&state.db, &query.user_id, query.status.as_deref())
            .await?;
    let total_pages = (total as f64 / per_page as f64).ceil() as i64;

    let items: Vec<UserNotificationResponse> = rows
        .into_iter()
        .map(|row| UserNotificationResponse {
            id: row.id,
            notification_id: row.notification_id,
            notification_type: row.notification_type,
            title: row.title,
            body: row.body,
            data: row
                .data
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            status: row.status,
            is_read: row.is_read,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(NotificationsListResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    }))
}

/// Event-wide announcement trigger
async fn trigger_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerEventRequest>,
) -> AppResult<Json<NotificationResponse>> {
    let kind = parse_kind(
        request.kind.as_deref(),
        NotificationType::EventUpdate,
        &[
            NotificationType::EventUpdate,
            NotificationType::ScheduledReminder,
        ],
    )?;

    let svc = NotificationService::new(&state);
    let notification = svc
        .notify_event(
            &request.event_id,
            &request.title,
            &request.body,
            &request.created_by,
            request.dedupe_key,
            kind,
        )
        .await?;

    Ok(Json(notification.into()))
}

/// Chat message trigger (invoked by the messaging write path)
async fn trigger_thread_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerThreadMessageRequest>,
) -> AppResult<Json<NotificationResponse>> {
    let svc = NotificationService::new(&state);
    let notification = svc
        .notify_thread_message(
            &request.thread_id,
            &request.message_id,
            &request.sender_id,
            &request.preview,
        )
        .await?;

    Ok(Json(notification.into()))
}

/// Direct addressing of an explicit recipient list
async fn trigger_direct(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerDirectRequest>,
) -> AppResult<Json<NotificationResponse>> {
    if request.user_ids.is_empty() {
        return Err(AppError::Validation("user_ids must not be empty".to_string()));
    }

    let kind = parse_kind(
        request.kind.as_deref(),
        NotificationType::Direct,
        &[
            NotificationType::Direct,
            NotificationType::NewThread,
            NotificationType::ScheduledReminder,
        ],
    )?;

    let svc = NotificationService::new(&state);
    let notification = svc
        .notify_direct(
            request.user_ids,
            &request.title,
            &request.body,
            request.data,
            &request.created_by,
            kind,
        )
        .await?;

    Ok(Json(notification.into()))
}

/// Manual sweep trigger (also run periodically by the background worker)
async fn run_sweep(State(state): State<Arc<AppState>>) -> AppResult<Json<SweepResponse>> {
    let svc = NotificationService::new(&state);
    let processed = svc.process_pending().await?;
    Ok(Json(SweepResponse { processed }))
}

/// Read receipt for one (notification, user) pair
async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<String>,
    Json(request): Json<MarkReadRequest>,
) -> AppResult<Json<MarkReadResponse>> {
    let updated =
        NotificationRepository::mark_read(&state.db, &notification_id, &request.user_id).await?;
    if !updated {
        return Err(AppError::NotFound(format!(
            "Notification {} has no delivery for user {}",
            notification_id, request.user_id
        )));
    }

    Ok(Json(MarkReadResponse { updated }))
}
