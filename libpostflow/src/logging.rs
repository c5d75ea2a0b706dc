//! Tracing setup for processes embedding the engine
//!
//! The `[logging]` section of [`Config`](crate::config::Config) picks the
//! output format and the default filter. `RUST_LOG` still wins over the
//! configured level when it is set.
//!
//! ```no_run
//! use libpostflow::Config;
//!
//! let config = Config::load()?;
//! config.logging.init();
//! # Ok::<(), libpostflow::PostflowError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain lines, suited to journald
    #[default]
    Text,
    /// One JSON object per event for log shippers
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{}' (text, json, pretty)", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `libpostflow::dispatcher=debug`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Apply `POSTFLOW_LOG_FORMAT` and `POSTFLOW_LOG_LEVEL`; an unparsable
    /// format is ignored with a warning
    pub fn apply_env_overrides(&mut self) {
        if let Ok(format) = std::env::var("POSTFLOW_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => tracing::warn!("Ignoring POSTFLOW_LOG_FORMAT: {}", e),
            }
        }
        if let Ok(level) = std::env::var("POSTFLOW_LOG_LEVEL") {
            self.level = level;
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber on stderr
    ///
    /// Returns `false` when a subscriber was already installed, in which case
    /// the existing one is kept.
    pub fn init(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr)
            .with_target(true);

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .try_init(),
            LogFormat::Pretty => builder.pretty().with_file(true).with_line_number(true).try_init(),
            LogFormat::Text => builder.with_ansi(false).try_init(),
        };

        installed.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_parses_case_insensitively() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(" Json ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("syslog"
            .parse::<LogFormat>()
            .unwrap_err()
            .contains("unknown log format 'syslog'"));
    }

    #[test]
    fn test_section_deserializes_from_toml() {
        let config: LoggingConfig = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    #[serial]
    fn test_env_overrides_format_and_level() {
        std::env::set_var("POSTFLOW_LOG_FORMAT", "pretty");
        std::env::set_var("POSTFLOW_LOG_LEVEL", "libpostflow=debug");

        let mut config = LoggingConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("POSTFLOW_LOG_FORMAT");
        std::env::remove_var("POSTFLOW_LOG_LEVEL");

        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "libpostflow=debug");
    }

    #[test]
    #[serial]
    fn test_bad_env_format_keeps_configured_one() {
        std::env::set_var("POSTFLOW_LOG_FORMAT", "xml");

        let mut config = LoggingConfig {
            format: LogFormat::Json,
            level: "warn".to_string(),
        };
        config.apply_env_overrides();

        std::env::remove_var("POSTFLOW_LOG_FORMAT");

        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_second_init_keeps_existing_subscriber() {
        let config = LoggingConfig::default();
        config.init();
        assert!(!config.init());
    }
}
