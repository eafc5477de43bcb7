use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::{PushTokenRepository, RegisterPushToken, UserRepository};
use crate::error::{AppError, AppResult};
use crate::AppState;

const SUPPORTED_PLATFORMS: [&str; 3] = ["ios", "android", "web"];

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(register_device).delete(unregister_device))
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub user_id: String,
    pub token: String,
    pub platform: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub id: String,
    pub registered: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterDeviceRequest {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UnregisterDeviceResponse {
    pub unregistered: bool,
}

/// Register a device token for push delivery. Re-registering the same
/// (user, token) pair re-activates it.
async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterDeviceRequest>,
) -> AppResult<Json<RegisterDeviceResponse>> {
    if !SUPPORTED_PLATFORMS.contains(&request.platform.as_str()) {
        return Err(AppError::Validation(format!(
            "Unsupported platform: {}",
            request.platform
        )));
    }

    if UserRepository::find_by_id(&state.db, &request.user_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!(
            "User {} not found",
            request.user_id
        )));
    }

    let token = PushTokenRepository::register(
        &state.db,
        RegisterPushToken {
            user_id: request.user_id,
            token: request.token,
            platform: request.platform,
        },
    )
    .await?;

    tracing::info!(
        "Registered push token for user {} ({})",
        token.user_id,
        token.platform
    );

    Ok(Json(RegisterDeviceResponse {
        id: token.id,
        registered: true,
    }))
}

/// Deactivate a device token. Idempotent from the client's perspective;
/// unknown pairs report `unregistered: false`.
async fn unregister_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnregisterDeviceRequest>,
) -> AppResult<Json<UnregisterDeviceResponse>> {
    let unregistered =
        PushTokenRepository::unregister(&state.db, &request.user_id, &request.token).await?;

    Ok(Json(UnregisterDeviceResponse { unregistered }))
}
