//! Call Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default maximum database pool size.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;

/// Default interval between server-initiated WebSocket pings.
pub const DEFAULT_WS_PING_INTERVAL_SECONDS: u64 = 20;

/// Default time without any inbound frame before a connection is dropped.
pub const DEFAULT_WS_IDLE_TIMEOUT_SECONDS: u64 = 60;

/// Default drain delay after a shutdown signal.
pub const DEFAULT_DRAIN_SECONDS: u64 = 0;

/// Default CC instance ID prefix.
pub const DEFAULT_CC_ID_PREFIX: &str = "cc";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Call Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Database URL is redacted in Debug output to prevent credential leakage.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: SecretString,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Ed25519 public key used to verify user tokens (base64url, JWK `x` form).
    pub jwt_public_key: String,

    /// JWT clock skew tolerance in seconds for `iat` validation.
    pub jwt_clock_skew_seconds: u64,

    /// Maximum database pool size.
    pub db_max_connections: u32,

    /// Interval between WebSocket pings in seconds.
    pub ws_ping_interval_seconds: u64,

    /// Inbound silence tolerated before a connection is treated as dead.
    pub ws_idle_timeout_seconds: u64,

    /// Unique identifier for this CC instance.
    pub cc_id: String,

    /// Drain delay on shutdown in seconds.
    pub drain_seconds: u64,

    /// Log output format.
    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_public_key", &self.jwt_public_key)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("db_max_connections", &self.db_max_connections)
            .field("ws_ping_interval_seconds", &self.ws_ping_interval_seconds)
            .field("ws_idle_timeout_seconds", &self.ws_idle_timeout_seconds)
            .field("cc_id", &self.cc_id)
            .field("drain_seconds", &self.drain_seconds)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(
            vars.get("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
                .clone(),
        );

        let jwt_public_key = vars
            .get("JWT_PUBLIC_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_PUBLIC_KEY".to_string()))?
            .trim()
            .to_string();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    "JWT_CLOCK_SKEW_SECONDS must be positive".to_string(),
                ));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidValue(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                    MAX_CLOCK_SKEW.as_secs()
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs()
        };

        let db_max_connections = parse_positive(
            vars,
            "DB_MAX_CONNECTIONS",
            u64::from(DEFAULT_DB_MAX_CONNECTIONS),
        )?;
        let db_max_connections = u32::try_from(db_max_connections).map_err(|_| {
            ConfigError::InvalidValue(format!(
                "DB_MAX_CONNECTIONS is too large, got {db_max_connections}"
            ))
        })?;

        let ws_ping_interval_seconds = parse_positive(
            vars,
            "WS_PING_INTERVAL_SECONDS",
            DEFAULT_WS_PING_INTERVAL_SECONDS,
        )?;

        let ws_idle_timeout_seconds = parse_positive(
            vars,
            "WS_IDLE_TIMEOUT_SECONDS",
            DEFAULT_WS_IDLE_TIMEOUT_SECONDS,
        )?;

        // A live client answers every ping, so the idle window must cover at
        // least one full ping round.
        if ws_idle_timeout_seconds <= ws_ping_interval_seconds {
            return Err(ConfigError::InvalidValue(format!(
                "WS_IDLE_TIMEOUT_SECONDS ({ws_idle_timeout_seconds}) must be greater than \
                 WS_PING_INTERVAL_SECONDS ({ws_ping_interval_seconds})"
            )));
        }

        let drain_seconds = if let Some(value_str) = vars.get("CC_DRAIN_SECONDS") {
            value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "CC_DRAIN_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?
        } else {
            DEFAULT_DRAIN_SECONDS
        };

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        // Generate CC instance ID
        let cc_id = vars.get("CC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_CC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            database_url,
            bind_address,
            jwt_public_key,
            jwt_clock_skew_seconds,
            db_max_connections,
            ws_ping_interval_seconds,
            ws_idle_timeout_seconds,
            cc_id,
            drain_seconds,
            log_format,
        })
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}
