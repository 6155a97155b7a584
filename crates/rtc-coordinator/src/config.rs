//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket/HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default IP the media transports listen on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default IP announced to remote endpoints in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

/// Default RTC port range.
pub const DEFAULT_MIN_PORT: u16 = 10000;
pub const DEFAULT_MAX_PORT: u16 = 10100;

/// Default bound on a single media engine call.
pub const DEFAULT_MEDIA_TIMEOUT_MS: u64 = 5000;

/// Default bound on a single document store call.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Default capacity limits.
pub const DEFAULT_MAX_ROOMS: usize = 1000;
pub const DEFAULT_MAX_PEERS_PER_ROOM: usize = 100;

/// Default allowed browser origin for the HTTP routes.
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Default tracing filter.
pub const DEFAULT_LOG_FILTER: &str = "rtc_coordinator=debug,tower_http=debug";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rtc";

/// What to do when a peer asks for a second recv transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecvTransportPolicy {
    /// Close the existing recv transport (and its consumers) and create a new one.
    #[default]
    Replace,
    /// Fail the request with `Conflict`.
    Reject,
}

impl FromStr for RecvTransportPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::InvalidValue(format!(
                "RTC_RECV_TRANSPORT_POLICY must be 'replace' or 'reject', got '{other}'"
            ))),
        }
    }
}

/// What to do when the media worker dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerRestartPolicy {
    /// Terminate the process and let the external supervisor restart it.
    #[default]
    Exit,
    /// Relaunch the worker in-process up to `max_restarts` times, then exit.
    Restart { max_restarts: u32 },
}

impl FromStr for WorkerRestartPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        if value == "exit" {
            return Ok(Self::Exit);
        }

        value
            .strip_prefix("restart:")
            .and_then(|n| n.parse::<u32>().ok())
            .map(|max_restarts| Self::Restart { max_restarts })
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "RTC_WORKER_RESTART_POLICY must be 'exit' or 'restart:N', got '{value}'"
                ))
            })
    }
}

/// Coordinator configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (document store for chat and notifications).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// WebSocket + HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub instance_id: String,

    /// IP the media transports listen on.
    pub listen_ip: String,

    /// IP announced to remote endpoints.
    pub announced_ip: String,

    /// Inclusive RTC port range handed to the media worker.
    pub min_port: u16,
    pub max_port: u16,

    /// Deadline for each media engine call.
    pub media_timeout: Duration,

    /// Deadline for each document store call.
    pub store_timeout: Duration,

    /// Maximum concurrently live rooms.
    pub max_rooms: usize,

    /// Maximum peers in a single room.
    pub max_peers_per_room: usize,

    /// Second recv transport behavior.
    pub recv_transport_policy: RecvTransportPolicy,

    /// Media worker death behavior.
    pub worker_restart_policy: WorkerRestartPolicy,

    /// Allowed browser origin for HTTP routes.
    pub cors_origin: String,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("listen_ip", &self.listen_ip)
            .field("announced_ip", &self.announced_ip)
            .field("min_port", &self.min_port)
            .field("max_port", &self.max_port)
            .field("media_timeout", &self.media_timeout)
            .field("store_timeout", &self.store_timeout)
            .field("max_rooms", &self.max_rooms)
            .field("max_peers_per_room", &self.max_peers_per_room)
            .field("recv_transport_policy", &self.recv_transport_policy)
            .field("worker_restart_policy", &self.worker_restart_policy)
            .field("cors_origin", &self.cors_origin)
            .field("observability", &self.observability)
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

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}='{raw}'"))),
        None => Ok(default),
    }
}

fn string_or(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let bind_address = string_or(vars, "RTC_BIND_ADDRESS", DEFAULT_BIND_ADDRESS);
        let health_bind_address =
            string_or(vars, "RTC_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS);
        let listen_ip = string_or(vars, "RTC_LISTEN_IP", DEFAULT_LISTEN_IP);
        let announced_ip = string_or(vars, "RTC_ANNOUNCED_IP", DEFAULT_ANNOUNCED_IP);
        let cors_origin = string_or(vars, "RTC_CORS_ORIGIN", DEFAULT_CORS_ORIGIN);

        let min_port = parse_or(vars, "RTC_MIN_PORT", DEFAULT_MIN_PORT)?;
        let max_port = parse_or(vars, "RTC_MAX_PORT", DEFAULT_MAX_PORT)?;
        if min_port > max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RTC_MIN_PORT ({min_port}) must not exceed RTC_MAX_PORT ({max_port})"
            )));
        }

        let media_timeout = Duration::from_millis(parse_or(
            vars,
            "RTC_MEDIA_TIMEOUT_MS",
            DEFAULT_MEDIA_TIMEOUT_MS,
        )?);
        let store_timeout = Duration::from_millis(parse_or(
            vars,
            "RTC_STORE_TIMEOUT_MS",
            DEFAULT_STORE_TIMEOUT_MS,
        )?);

        let max_rooms = parse_or(vars, "RTC_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_peers_per_room =
            parse_or(vars, "RTC_MAX_PEERS_PER_ROOM", DEFAULT_MAX_PEERS_PER_ROOM)?;

        let recv_transport_policy: RecvTransportPolicy = vars
            .get("RTC_RECV_TRANSPORT_POLICY")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();

        let worker_restart_policy: WorkerRestartPolicy = vars
            .get("RTC_WORKER_RESTART_POLICY")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();

        let observability = ObservabilityConfig::from_vars(vars, DEFAULT_LOG_FILTER);

        // Generate instance ID
        let instance_id = vars.get("RTC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            bind_address,
            health_bind_address,
            instance_id,
            listen_ip,
            announced_ip,
            min_port,
            max_port,
            media_timeout,
            store_timeout,
            max_rooms,
            max_peers_per_room,
            recv_transport_policy,
            worker_restart_policy,
            cors_origin,
            observability,
        })
    }
}
