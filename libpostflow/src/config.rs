//! Configuration management for Postflow
//!
//! Every section carries serde defaults, so an empty TOML file yields a
//! working configuration:
//!
//! ```toml
//! [database]
//! path = "~/.local/share/postflow/postflow.db"
//!
//! [scheduling]
//! poll_interval_secs = 60
//! workers = 4
//!
//! [resilience]
//! max_retries = 3
//! backoff_base_ms = 1000
//! backoff_factor = 2.0
//!
//! [rate_limits.platforms]
//! instagram = 200
//! youtube = 10000
//!
//! [logging]
//! format = "json"
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduling: SchedulingConfig,
    pub resilience: ResilienceConfig,
    pub rate_limits: RateLimitConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/postflow/postflow.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Seconds between scans for due publishing logs
    pub poll_interval_secs: u64,
    /// Concurrent publish workers
    pub workers: usize,
    /// Jobs buffered between the scheduler and the workers
    pub queue_capacity: usize,
    pub token_refresh_interval_secs: u64,
    /// Refresh tokens expiring within this many hours
    pub token_refresh_window_hours: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            workers: 4,
            queue_capacity: 256,
            token_refresh_interval_secs: 3600,
            token_refresh_window_hours: 24,
        }
    }
}

impl SchedulingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs)
    }

    pub fn token_refresh_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_refresh_window_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    /// Consecutive failures before a platform circuit opens
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    /// Upper bound on a single platform call
    pub call_timeout_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_factor: 2.0,
            failure_threshold: 5,
            open_timeout_secs: 30,
            call_timeout_secs: 30,
        }
    }
}

impl ResilienceConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Budget for platforms without an explicit entry
    pub default_per_hour: u32,
    /// Requests per hour, keyed by platform name
    pub platforms: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut platforms = HashMap::new();
        platforms.insert("instagram".to_string(), 200);
        platforms.insert("facebook".to_string(), 200);
        platforms.insert("youtube".to_string(), 10000);

        Self {
            default_per_hour: 1000,
            platforms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Events buffered per subscriber before the oldest are dropped
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: the defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        if let Ok(db_path) = std::env::var("POSTFLOW_DB_PATH") {
            config.database.path = db_path;
        }
        config.logging.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or hot-loop the engine
    pub fn validate(&self) -> Result<()> {
        if self.scheduling.workers == 0 {
            return Err(invalid("scheduling.workers", "must be at least 1"));
        }
        if self.scheduling.poll_interval_secs == 0 {
            return Err(invalid("scheduling.poll_interval_secs", "must be at least 1"));
        }
        if self.scheduling.queue_capacity == 0 {
            return Err(invalid("scheduling.queue_capacity", "must be at least 1"));
        }
        if self.resilience.backoff_factor < 1.0 {
            return Err(invalid("resilience.backoff_factor", "must be >= 1.0"));
        }
        if self.resilience.failure_threshold == 0 {
            return Err(invalid("resilience.failure_threshold", "must be at least 1"));
        }
        if self.resilience.call_timeout_secs == 0 {
            return Err(invalid("resilience.call_timeout_secs", "must be at least 1"));
        }
        if self.notifications.capacity == 0 {
            return Err(invalid("notifications.capacity", "must be at least 1"));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(invalid("logging.level", "not a valid filter directive"));
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::PostflowError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path under the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTFLOW_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postflow").join("config.toml"))
}
