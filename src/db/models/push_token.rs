use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One device's registration handle with the push gateway.
///
/// A user may hold any number of tokens (multi-device). Tokens the gateway
/// reports as permanently invalid are flipped to `is_active = false` so
/// later dispatch cycles skip them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PushToken {
    pub id: String,
    pub user_id: String,
    /// Opaque handle issued by the device platform.
    pub token: String,
    /// 'ios', 'android', 'web'
    pub platform: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Data required to register (or re-activate) a device token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPushToken {
    pub user_id: String,
    pub token: String,
    pub platform: String,
}
