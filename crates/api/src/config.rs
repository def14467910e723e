//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset keeps everything in memory
/// - `DAPR_HOST` / `DAPR_HTTP_PORT`: sidecar address (default: `127.0.0.1:3500`)
/// - `PUBSUB_NAME`: pub/sub component name (default: `"pubsub"`)
/// - `RESERVATION_TIMEOUT_SECS`: age at which unmoved reservations are released (default: `1800`)
/// - `REAPER_INTERVAL_SECS`: time between reaper sweeps (default: `60`)
/// - `STORE_RETRY_ATTEMPTS`: retries of transient store failures (default: `3`)
/// - `MAX_IN_FLIGHT_EVENTS`: events handled concurrently (default: `64`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub dapr_host: String,
    pub dapr_http_port: u16,
    pub pubsub_name: String,
    pub reservation_timeout: Duration,
    pub reaper_interval: Duration,
    pub store_retry_attempts: usize,
    pub max_in_flight_events: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            dapr_host: lookup("DAPR_HOST").unwrap_or(defaults.dapr_host),
            dapr_http_port: lookup("DAPR_HTTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.dapr_http_port),
            pubsub_name: lookup("PUBSUB_NAME").unwrap_or(defaults.pubsub_name),
            reservation_timeout: parsed("RESERVATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_timeout),
            reaper_interval: parsed("REAPER_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            store_retry_attempts: parsed("STORE_RETRY_ATTEMPTS")
                .map(|n| n as usize)
                .unwrap_or(defaults.store_retry_attempts),
            max_in_flight_events: parsed("MAX_IN_FLIGHT_EVENTS")
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .unwrap_or(defaults.max_in_flight_events),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the sidecar's HTTP API.
    pub fn dapr_url(&self) -> String {
        format!("http://{}:{}", self.dapr_host, self.dapr_http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            dapr_host: "127.0.0.1".to_string(),
            dapr_http_port: 3500,
            pubsub_name: "pubsub".to_string(),
            reservation_timeout: Duration::from_secs(1800),
            reaper_interval: Duration::from_secs(60),
            store_retry_attempts: 3,
            max_in_flight_events: 64,
        }
    }
}
