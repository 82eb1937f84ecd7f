//! Environment-driven configuration with validation.
//!
//! Every tunable the core consumes is injected here, never hard-coded:
//! rate-limit defaults and overrides, socket buffer/timeout settings, and
//! the credential validation parameters.

use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: String, reason: String },

    /// Invalid port number
    #[error("Invalid port: must be between 1 and 65535")]
    InvalidPort,

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// A timeout/period pair is ordered wrong
    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    /// A capacity or limit must be non-zero
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError { name: String, reason: String },
}

/// Socket (WebSocket proxy) tunables.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Inbound frame buffer hint in bytes
    pub read_buffer_size: usize,
    /// Outbound frame buffer hint in bytes
    pub write_buffer_size: usize,
    /// Ceiling on the upgrade handshake
    pub handshake_timeout: Duration,
    /// Ceiling on a single read from the peer
    pub read_deadline: Duration,
    /// Ceiling on a single write to the peer
    pub write_deadline: Duration,
    /// Liveness: disconnect when no frame seen for this long
    pub pong_timeout: Duration,
    /// Period between writer-emitted pings
    pub ping_period: Duration,
    /// Maximum accepted inbound frame size in bytes
    pub max_message_size: usize,
    /// Global concurrent session ceiling
    pub max_connections: usize,
    /// Per-user concurrent session ceiling
    pub max_connections_per_user: usize,
    /// Bounded outbound queue capacity per session
    pub outbound_queue_capacity: usize,
    /// Bounded wait for a point-to-point send before the peer is
    /// considered unresponsive
    pub send_timeout: Duration,
    /// Period of the background liveness sweep
    pub sweep_interval: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            handshake_timeout: Duration::from_secs(10),
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(60),
            ping_period: Duration::from_secs(30),
            max_message_size: 64 * 1024,
            max_connections: 10_000,
            max_connections_per_user: 8,
            outbound_queue_capacity: 256,
            send_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// Credential validation parameters.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: String,
    /// HS256 shared secret for the default signing key. Key generation and
    /// rotation live outside this service; this is only the material the
    /// validator trusts right now.
    pub hs256_secret: Vec<u8>,
}

/// Rate limit shape for one key: `requests` per `window`, with `burst`
/// headroom for the degraded-mode token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per window
    pub requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
    /// Extra bucket capacity in degraded mode
    pub burst: u32,
}

impl RateLimitConfig {
    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            requests: 100,
            window_secs: 60,
            burst: 20,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port (1-65535)
    pub port: u16,
    /// Redis URL for the distributed counter store; `None` selects the
    /// in-process degraded-mode limiter.
    pub redis_url: Option<Url>,
    /// Credential validation parameters
    pub auth: AuthConfig,
    /// Socket tunables
    pub socket: SocketConfig,
    /// Global default rate limit
    pub rate_limit: RateLimitConfig,
    /// Per-route-pattern overrides, consulted after per-user and per-address
    /// rules
    pub rate_limit_routes: Vec<(String, RateLimitConfig)>,
    /// Ceiling on one distributed-counter round trip
    pub rate_limit_store_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Emit logs as JSON
    pub log_json: bool,
}

impl Config {
    /// Loads configuration from environment variables with validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 8080)?,
            redis_url: parse_opt_url_env("REDIS_URL")?,
            auth: AuthConfig {
                issuer: env::var("JWT_ISSUER")
                    .map_err(|_| ConfigError::MissingRequired("JWT_ISSUER".to_string()))?,
                audience: env::var("JWT_AUDIENCE")
                    .map_err(|_| ConfigError::MissingRequired("JWT_AUDIENCE".to_string()))?,
                hs256_secret: env::var("JWT_HS256_SECRET")
                    .map_err(|_| ConfigError::MissingRequired("JWT_HS256_SECRET".to_string()))?
                    .into_bytes(),
            },
            socket: SocketConfig {
                read_buffer_size: parse_env("WS_READ_BUFFER_SIZE", 4096)?,
                write_buffer_size: parse_env("WS_WRITE_BUFFER_SIZE", 4096)?,
                handshake_timeout: secs_env("WS_HANDSHAKE_TIMEOUT", 10)?,
                read_deadline: secs_env("WS_READ_DEADLINE", 60)?,
                write_deadline: secs_env("WS_WRITE_DEADLINE", 10)?,
                pong_timeout: secs_env("WS_PONG_TIMEOUT", 60)?,
                ping_period: secs_env("WS_PING_PERIOD", 30)?,
                max_message_size: parse_env("WS_MAX_MESSAGE_SIZE", 64 * 1024)?,
                max_connections: parse_env("WS_MAX_CONNECTIONS", 10_000)?,
                max_connections_per_user: parse_env("WS_MAX_CONNECTIONS_PER_USER", 8)?,
                outbound_queue_capacity: parse_env("WS_OUTBOUND_QUEUE_CAPACITY", 256)?,
                send_timeout: secs_env("WS_SEND_TIMEOUT", 3)?,
                sweep_interval: secs_env("WS_SWEEP_INTERVAL", 15)?,
            },
            rate_limit: RateLimitConfig {
                requests: parse_env("RATE_LIMIT_REQUESTS", 100)?,
                window_secs: parse_env("RATE_LIMIT_WINDOW", 60)?,
                burst: parse_env("RATE_LIMIT_BURST", 20)?,
            },
            rate_limit_routes: parse_route_overrides(
                &env::var("RATE_LIMIT_ROUTES").unwrap_or_default(),
            )?,
            rate_limit_store_timeout: secs_env("RATE_LIMIT_STORE_TIMEOUT", 2)?,
            shutdown_timeout: secs_env("SHUTDOWN_TIMEOUT", 30)?,
            log_json: parse_env("LOG_JSON", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.auth.hs256_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_HS256_SECRET".to_string()));
        }
        if self.socket.ping_period >= self.socket.pong_timeout {
            return Err(ConfigError::InvalidTiming(
                "ping period must be shorter than pong timeout".to_string(),
            ));
        }
        if self.socket.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity(
                "outbound queue capacity must be non-zero".to_string(),
            ));
        }
        if self.socket.max_connections == 0 || self.socket.max_connections_per_user == 0 {
            return Err(ConfigError::InvalidCapacity(
                "connection limits must be non-zero".to_string(),
            ));
        }
        if self.rate_limit.requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidCapacity(
                "rate limit requests and window must be non-zero".to_string(),
            ));
        }
        for (pattern, config) in &self.rate_limit_routes {
            if config.requests == 0 || config.window_secs == 0 {
                return Err(ConfigError::InvalidCapacity(format!(
                    "rate limit override for {pattern} must have non-zero requests and window"
                )));
            }
        }
        Ok(())
    }
}

/// Parses route overrides of the form
/// `/route=requests:window:burst,/other/*=requests:window:burst`.
fn parse_route_overrides(raw: &str) -> Result<Vec<(String, RateLimitConfig)>, ConfigError> {
    let mut overrides = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parse_err = |reason: &str| ConfigError::ParseError {
            name: "RATE_LIMIT_ROUTES".to_string(),
            reason: format!("{reason} in `{entry}`"),
        };
        let (pattern, shape) = entry
            .split_once('=')
            .ok_or_else(|| parse_err("missing `=`"))?;
        let mut parts = shape.split(':');
        let mut next_num = |what: &str| -> Result<u64, ConfigError> {
            parts
                .next()
                .ok_or_else(|| parse_err(&format!("missing {what}")))?
                .parse()
                .map_err(|_| parse_err(&format!("invalid {what}")))
        };
        let requests = next_num("requests")? as u32;
        let window_secs = next_num("window")?;
        let burst = next_num("burst")? as u32;
        if parts.next().is_some() {
            return Err(parse_err("unexpected trailing field"));
        }
        overrides.push((
            pattern.to_string(),
            RateLimitConfig {
                requests,
                window_secs,
                burst,
            },
        ));
    }
    Ok(overrides)
}

/// Parse an environment variable with a default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a duration-in-seconds environment variable.
fn secs_env(name: &str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_env(name, default)?))
}

/// Parse an optional URL environment variable.
fn parse_opt_url_env(name: &str) -> Result<Option<Url>, ConfigError> {
    match env::var(name) {
        Ok(url_str) => Url::parse(&url_str)
            .map(Some)
            .map_err(|e| ConfigError::InvalidUrl {
                field: name.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
