//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hirewire_shared::constants::{
    DEFAULT_ALLOWED_ORIGINS, DEFAULT_HTTP_PORT, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_OUTBOUND_BUFFER, DEFAULT_PING_INTERVAL_SECS, DEFAULT_STORE_TIMEOUT_MS,
};

/// Secret shared with the auth service for HS256 token verification.
/// Never printed.
#[derive(Clone)]
pub struct JwtSecret(String);

impl JwtSecret {
    const DEV_DEFAULT: &'static str = "hirewire-insecure-dev-secret";

    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0 == Self::DEV_DEFAULT
    }
}

impl Default for JwtSecret {
    fn default() -> Self {
        Self(Self::DEV_DEFAULT.to_string())
    }
}

impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.0.len())
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server, REST and WebSocket alike.
    /// Env: `HTTP_ADDR`, or `PORT` to keep the default interface.
    /// Default: `0.0.0.0:5001`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (see `Database::open_default`).
    pub database_path: Option<PathBuf>,

    /// HS256 secret used to verify bearer tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development secret (a warning is logged).
    pub jwt_secret: JwtSecret,

    /// Origins allowed by CORS.
    /// Env: `ALLOWED_ORIGINS` (comma separated); `FRONTEND_URL` is appended.
    /// Default: local frontend dev servers.
    pub allowed_origins: Vec<String>,

    /// Upper bound on any single persistence call.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: 5000 ms
    pub store_timeout: Duration,

    /// Outbound events buffered per live connection.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: 256
    pub outbound_buffer: usize,

    /// A live connection with no inbound frame (pongs included) for this
    /// long is closed.
    /// Env: `IDLE_TIMEOUT_SECS`
    /// Default: 60 s
    pub idle_timeout: Duration,

    /// How often the server pings each live connection. Kept below
    /// `idle_timeout` so a healthy client always answers in time.
    /// Env: `PING_INTERVAL_SECS`
    /// Default: 25 s
    pub ping_interval: Duration,

    /// Sustained request rate per client (REST per IP, live sends per user).
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: 10
    pub rate_limit_per_sec: f64,

    /// Burst capacity for the rate limiters.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: 30
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            jwt_secret: JwtSecret::default(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = get("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(secret) = get("JWT_SECRET").filter(|s| !s.is_empty()) {
            config.jwt_secret = JwtSecret::new(secret);
        }

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            let parsed = parse_origins(&origins);
            if !parsed.is_empty() {
                config.allowed_origins = parsed;
            }
        }

        if let Some(frontend) = get("FRONTEND_URL") {
            let frontend = frontend.trim().trim_end_matches('/').to_string();
            if !frontend.is_empty() && !config.allowed_origins.contains(&frontend) {
                config.allowed_origins.push(frontend);
            }
        }

        if let Some(val) = get("STORE_TIMEOUT_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.store_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid STORE_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = get("OUTBOUND_BUFFER") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_BUFFER, using default"),
            }
        }

        if let Some(val) = get("IDLE_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.idle_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid IDLE_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = get("PING_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.ping_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PING_INTERVAL_SECS, using default"),
            }
        }

        if config.ping_interval >= config.idle_timeout {
            let ping_interval = config.idle_timeout / 2;
            tracing::warn!(
                ping = ?config.ping_interval,
                idle = ?config.idle_timeout,
                adjusted = ?ping_interval,
                "Ping interval must be shorter than the idle timeout"
            );
            config.ping_interval = ping_interval;
        }

        if let Some(val) = get("RATE_LIMIT_PER_SEC") {
            match val.trim().parse::<f64>() {
                Ok(rate) if rate > 0.0 => config.rate_limit_per_sec = rate,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_SEC, using default"),
            }
        }

        if let Some(val) = get("RATE_LIMIT_BURST") {
            match val.trim().parse::<f64>() {
                Ok(burst) if burst >= 1.0 => config.rate_limit_burst = burst,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
