//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Key Service
//!
//! - `KEYGATE_BASE_URL`: Base URL of the key / ratelimit service (default: `https://api.unkey.dev`)
//! - `KEYGATE_API_ID`: API whose keys are verified by the API key middleware
//! - `KEYGATE_ROOT_KEY`: Root credential used by the remote rate limiter
//! - `KEYGATE_HTTP_TIMEOUT_MS`: Timeout for every call to the key service (default: 5000)
//!
//! # Rate Limiting
//!
//! - `KEYGATE_RATELIMIT_NAMESPACE`: Namespace identifiers are grouped under (default: `keygate`)
//! - `KEYGATE_RATELIMIT_LIMIT`: Requests allowed per window (default: 10)
//! - `KEYGATE_RATELIMIT_DURATION_MS`: Window length in milliseconds (default: 60000)
//! - `KEYGATE_RATELIMIT_ASYNC`: Let the service answer from its edge cache (default: false)
//! - `KEYGATE_RATELIMIT_BACKEND`: `remote` or `local` (default: `remote` when a root key is set)
//!
//! # Server
//!
//! - `HOST` / `PORT`: Bind address (default: `0.0.0.0:3000`)
//! - `AUTH_BYPASS_PATHS`: Comma-separated paths that skip API key checks (default: `/health`)
//! - `METRICS_PORT`: Prometheus endpoint port, 0 disables it (default: 0)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Default base URL of the key service.
pub const DEFAULT_BASE_URL: &str = "https://api.unkey.dev";

/// Environment variable the API key middleware falls back to for its API id.
pub const API_ID_ENV: &str = "KEYGATE_API_ID";

/// Where rate limit decisions are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatelimitBackend {
    /// Ask the remote ratelimit service.
    Remote,
    /// Decide in-process with a GCRA limiter.
    Local,
}

impl FromStr for RatelimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown backend '{other}', expected 'remote' or 'local'")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Key Service Configuration
    // =========================================================================
    /// Base URL of the key / ratelimit service
    pub base_url: String,

    /// API id passed along with every key verification
    pub api_id: Option<String>,

    /// Root key for the remote rate limiter
    pub root_key: Option<String>,

    /// Timeout applied by the HTTP client to each key service call
    pub http_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Namespace for rate limit identifiers
    pub ratelimit_namespace: String,

    /// Requests allowed per window
    pub ratelimit_limit: u32,

    /// Window length
    pub ratelimit_duration: Duration,

    /// Async mode for the remote limiter
    pub ratelimit_async: bool,

    /// Which limiter backend to build
    pub ratelimit_backend: RatelimitBackend,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Paths that skip API key verification (exact match).
    /// Default: ["/health"]
    pub auth_bypass_paths: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let root_key = non_empty_var("KEYGATE_ROOT_KEY");
        let default_backend = if root_key.is_some() {
            RatelimitBackend::Remote
        } else {
            RatelimitBackend::Local
        };

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Key service
            base_url: env::var("KEYGATE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_id: non_empty_var(API_ID_ENV),
            root_key,
            http_timeout: Duration::from_millis(Self::parse_env("KEYGATE_HTTP_TIMEOUT_MS", 5000)?),

            // Rate limiting
            ratelimit_namespace: env::var("KEYGATE_RATELIMIT_NAMESPACE")
                .unwrap_or_else(|_| "keygate".to_string()),
            ratelimit_limit: Self::parse_env("KEYGATE_RATELIMIT_LIMIT", 10)?,
            ratelimit_duration: Duration::from_millis(Self::parse_env(
                "KEYGATE_RATELIMIT_DURATION_MS",
                60_000,
            )?),
            ratelimit_async: Self::parse_env("KEYGATE_RATELIMIT_ASYNC", false)?,
            ratelimit_backend: Self::parse_env("KEYGATE_RATELIMIT_BACKEND", default_backend)?,

            // Security
            auth_bypass_paths: Self::parse_auth_bypass_paths(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if self.ratelimit_limit == 0 {
            return Err(AppError::ConfigError(
                "KEYGATE_RATELIMIT_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.ratelimit_duration.is_zero() {
            return Err(AppError::ConfigError(
                "KEYGATE_RATELIMIT_DURATION_MS must be greater than 0".to_string(),
            ));
        }

        if self.ratelimit_backend == RatelimitBackend::Remote && self.root_key.is_none() {
            return Err(AppError::ConfigError(
                "KEYGATE_ROOT_KEY is required for the remote ratelimit backend".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(AppError::ConfigError(format!(
                "KEYGATE_BASE_URL must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse auth bypass paths from environment variable.
    ///
    /// Default: "/health". Entries not starting with '/' are dropped.
    fn parse_auth_bypass_paths() -> Vec<String> {
        env::var("AUTH_BYPASS_PATHS")
            .unwrap_or_else(|_| "/health".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s.starts_with('/'))
            .collect()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_id: None,
            root_key: None,
            http_timeout: Duration::from_secs(5),
            ratelimit_namespace: "keygate".to_string(),
            ratelimit_limit: 10,
            ratelimit_duration: Duration::from_secs(60),
            ratelimit_async: false,
            ratelimit_backend: RatelimitBackend::Local,
            auth_bypass_paths: vec!["/health".to_string()],
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}
