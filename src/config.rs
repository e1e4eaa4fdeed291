use crate::error::AppError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

/// Minimum decoded length of the HMAC signing secret
const MIN_SECRET_BYTES: usize = 32;

/// What the gateway does with a connection whose credential did not verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnauthenticatedPolicy {
    /// Complete the WebSocket handshake; every frame the client sends is dropped and logged
    #[default]
    AllowHandshake,
    /// Refuse the upgrade with 401
    Reject,
}

impl FromStr for UnauthenticatedPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "allow_handshake" => Ok(Self::AllowHandshake),
            "reject" => Ok(Self::Reject),
            other => Err(AppError::Config(format!(
                "WS_UNAUTHENTICATED_POLICY must be `allow` or `reject`, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub unauthenticated_policy: UnauthenticatedPolicy,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            unauthenticated_policy: UnauthenticatedPolicy::AllowHandshake,
            heartbeat_interval_secs: 5,
            client_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: usize,
    pub redis_url: String,
    pub port: u16,
    pub jwt_secret: Vec<u8>,
    pub jwt_ttl_seconds: i64,
    /// Pub/sub channel shared by every gateway instance
    pub chat_channel: String,
    pub ws: WsConfig,
    pub max_message_length: usize,
    /// Shared key for the login collaborator; the issue endpoint is disabled when unset
    pub internal_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(16);
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let secret_env = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        let jwt_secret = decode_secret(&secret_env)?;

        let jwt_ttl_seconds = env::var("JWT_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86_400);
        if jwt_ttl_seconds <= 0 {
            return Err(AppError::Config("JWT_TTL_SECONDS must be positive".into()));
        }

        let chat_channel = env::var("CHAT_CHANNEL").unwrap_or_else(|_| "chat".into());

        let unauthenticated_policy = match env::var("WS_UNAUTHENTICATED_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => UnauthenticatedPolicy::default(),
        };
        let ws_defaults = WsConfig::default();
        let ws = WsConfig {
            unauthenticated_policy,
            heartbeat_interval_secs: env::var("WS_HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(ws_defaults.heartbeat_interval_secs),
            client_timeout_secs: env::var("WS_CLIENT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(ws_defaults.client_timeout_secs),
        };

        let max_message_length = env::var("MAX_MESSAGE_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2000);

        let internal_api_key = env::var("INTERNAL_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            database_url,
            db_max_connections,
            redis_url,
            port,
            jwt_secret,
            jwt_ttl_seconds,
            chat_channel,
            ws,
            max_message_length,
            internal_api_key,
        })
    }
}

fn decode_secret(value: &str) -> Result<Vec<u8>, AppError> {
    let bytes = STANDARD
        .decode(value.trim().as_bytes())
        .map_err(|e| AppError::Config(format!("JWT_SECRET decode: {e}")))?;
    if bytes.len() < MIN_SECRET_BYTES {
        return Err(AppError::Config(format!(
            "JWT_SECRET must decode to at least {MIN_SECRET_BYTES} bytes"
        )));
    }
    Ok(bytes)
}
