//! Configuration management for Tollbooth.
//!
//! Settings are layered: built-in defaults, then an optional YAML file,
//! then `TOLLBOOTH__`-prefixed environment variables
//! (`TOLLBOOTH__RATE_LIMITING__MAX_REQUESTS=20`). Command line flags are
//! applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollboothError};
use crate::http::KeySource;
use crate::ratelimit::{ExpiryPolicy, RateLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TOLLBOOTH";

/// Main configuration for the Tollbooth service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollboothConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Background job configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// How stale entries are dropped
    #[serde(default)]
    pub expiry: ExpiryPolicy,

    /// Sweep interval in milliseconds; 0 disables the sweeper
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Where the client key comes from
    #[serde(default)]
    pub key_source: KeySource,

    /// Header read when `key_source` is `header`
    #[serde(default = "default_key_header")]
    pub key_header: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            expiry: ExpiryPolicy::default(),
            sweep_interval_ms: default_sweep_interval(),
            key_source: KeySource::default(),
            key_header: default_key_header(),
        }
    }
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW.as_millis() as u64
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_sweep_interval() -> u64 {
    60_000
}

fn default_key_header() -> String {
    "x-forwarded-for".to_string()
}

impl RateLimitingConfig {
    /// The window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The sweep interval, or `None` if sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    /// Build a limiter from these settings.
    pub fn build_limiter(&self) -> RateLimiter {
        RateLimiter::with_expiry(self.window(), self.max_requests, self.expiry)
    }
}

/// Background job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum number of pending email jobs
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl TollboothConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config: TollboothConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollboothConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollboothError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.window_ms == 0 {
            return Err(TollboothError::Config(
                "rate_limiting.window_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.key_source == KeySource::Header
            && self.rate_limiting.key_header.trim().is_empty()
        {
            return Err(TollboothError::Config(
                "rate_limiting.key_header is required when key_source is header".to_string(),
            ));
        }
        if self.jobs.queue_capacity == 0 {
            return Err(TollboothError::Config(
                "jobs.queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
