use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: PushGatewayConfig,
    pub sweep: SweepConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushGatewayConfig {
    /// Endpoint the dispatcher POSTs message batches to.
    pub url: String,
    /// Optional bearer credential for the gateway.
    pub access_token: Option<String>,
    /// Maximum messages per gateway call; larger batches are chunked.
    pub batch_size: usize,
    /// Per-call request timeout (seconds). Timeouts classify as transient.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the public trigger endpoints
    pub trigger_per_second: u32,
    /// Burst size for the trigger endpoints
    pub trigger_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Whether the pending-notification sweep worker is enabled.
    pub enabled: bool,
    /// How often (seconds) the worker polls for pending notifications.
    pub poll_interval_seconds: u64,
    /// Maximum notifications claimed per sweep pass.
    pub batch_size: i64,
    /// Maximum dispatch attempts before a stuck-pending notification is
    /// finalized as failed.
    pub max_attempts: i64,
    /// Minimum seconds between attempts for one notification; an
    /// overlapping sweep skips rows claimed inside this window.
    pub claim_cooldown_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            gateway: PushGatewayConfig {
                url: env::var("PUSH_GATEWAY_URL")
                    .map_err(|_| ConfigError::MissingEnv("PUSH_GATEWAY_URL".to_string()))?,
                access_token: env::var("PUSH_GATEWAY_ACCESS_TOKEN").ok(),
                batch_size: env::var("PUSH_GATEWAY_BATCH_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
                timeout_seconds: env::var("PUSH_GATEWAY_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u64),
            },
            sweep: SweepConfig {
                enabled: match env::var("SWEEP_ENABLED") {
                    Ok(v) => match v.to_lowercase().as_str() {
                        "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => true,
                    },
                    Err(_) => true,
                },
                poll_interval_seconds: env::var("SWEEP_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
                batch_size: env::var("SWEEP_BATCH_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20i64),
                max_attempts: env::var("SWEEP_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5i64),
                claim_cooldown_seconds: env::var("SWEEP_CLAIM_COOLDOWN_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15i64),
            },
            rate_limit: RateLimitConfig {
                trigger_per_second: env::var("RATE_LIMIT_TRIGGER_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                trigger_burst: env::var("RATE_LIMIT_TRIGGER_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            gateway: PushGatewayConfig {
                url: "http://localhost:9040/push/send".to_string(),
                access_token: None,
                batch_size: 100,
                timeout_seconds: 10,
            },
            sweep: SweepConfig {
                enabled: true,
                poll_interval_seconds: 30,
                batch_size: 20,
                max_attempts: 5,
                claim_cooldown_seconds: 15,
            },
            rate_limit: RateLimitConfig {
                trigger_per_second: 10,
                trigger_burst: 50,
            },
        }
    }
}
