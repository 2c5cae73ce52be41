//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/exceptional.toml` (base configuration)
//! 2. Environment variables prefixed with `EXCEPTIONAL_`, nested keys separated by `__`
//!
//! Every field has a default, so an empty or missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use exceptional::config::ExceptionalConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // EXCEPTIONAL_BUFFER__CAPACITY=4096 overrides [buffer] capacity
//! let config = ExceptionalConfig::load()?;
//! config.validate()?;
//! println!("Buffer file: {}", config.buffer.path.display());
//! # Ok(())
//! # }
//! ```

use crate::buffer::layout::{MAX_SHARED_CAPACITY, MIN_CAPACITY};
use crate::error::{RingError, RingResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/exceptional.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionalConfig {
    /// Shared record buffer
    pub buffer: BufferConfig,
    /// Draining thread tuning
    pub writer: WriterConfig,
    /// Record payload encoding
    pub payload: PayloadConfig,
    /// Collected report storage
    pub store: StoreConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

/// Shared record buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// File backing the shared mapping (typically in /dev/shm or /tmp)
    pub path: PathBuf,
    /// Payload capacity in bytes (header excluded)
    pub capacity: usize,
}

/// Draining thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Spin-loop hints before yielding while the buffer is full
    pub spin_retries: u32,
    /// Sleep between retries once spinning and yielding did not free space
    pub backoff_micros: u64,
    /// Longest park while the pending queue is empty
    pub idle_wait_millis: u64,
}

/// Payload encoding settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// LZ4-compress encoded reports before they enter the buffer
    pub compress: bool,
}

/// Collected report storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON-lines file that `tail --store` appends decoded reports to
    pub path: PathBuf,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for development)
    #[default]
    Pretty,
    /// Compact single-line format without colors
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/exceptional.ring"),
            // 32 KiB region including the 8-byte cursor header
            capacity: 32_760,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            spin_retries: 10,
            backoff_micros: 100,
            idle_wait_millis: 50,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/exceptional-reports.jsonl"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl WriterConfig {
    /// Sleep between retries on a full buffer.
    pub fn backoff(&self) -> Duration {
        Duration::from_micros(self.backoff_micros)
    }

    /// Longest idle park of the draining thread.
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_millis)
    }
}

impl ExceptionalConfig {
    /// Load configuration from `config/exceptional.toml` and environment variables
    pub fn load() -> RingResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RingResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("EXCEPTIONAL_").split("__"))
    }

    /// Render the effective configuration as TOML, e.g. to seed a config file.
    pub fn to_toml_string(&self) -> RingResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            RingError::Configuration(format!("Failed to serialize configuration: {e}"))
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> RingResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RingError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if !(MIN_CAPACITY..=MAX_SHARED_CAPACITY).contains(&self.buffer.capacity) {
            return Err(RingError::Configuration(format!(
                "Invalid buffer capacity {}. Must be {}-{} bytes",
                self.buffer.capacity, MIN_CAPACITY, MAX_SHARED_CAPACITY
            )));
        }

        if self.buffer.path.as_os_str().is_empty() {
            return Err(RingError::Configuration(
                "Buffer path must not be empty".to_string(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(RingError::Configuration(
                "Store path must not be empty".to_string(),
            ));
        }

        if self.writer.idle_wait_millis == 0 {
            return Err(RingError::Configuration(
                "writer.idle_wait_millis must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExceptionalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer.capacity, 32_760);
        assert_eq!(config.writer.backoff(), Duration::from_micros(100));
        assert_eq!(config.writer.idle_wait(), Duration::from_millis(50));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("exceptional.toml");
        std::fs::write(
            &path,
            r#"
                [buffer]
                path = "/dev/shm/app.ring"
                capacity = 4096

                [payload]
                compress = true

                [store]
                path = "/var/lib/exceptional/reports.jsonl"

                [logging]
                level = "debug"
                format = "json"
            "#,
        )
        .unwrap();

        let config = ExceptionalConfig::load_from(&path).unwrap();
        assert_eq!(config.buffer.path, PathBuf::from("/dev/shm/app.ring"));
        assert_eq!(config.buffer.capacity, 4096);
        assert!(config.payload.compress);
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/exceptional/reports.jsonl")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        // untouched sections keep their defaults
        assert_eq!(config.writer, WriterConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let config = ExceptionalConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, ExceptionalConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("EXCEPTIONAL_BUFFER__CAPACITY", "1024");
        let config = ExceptionalConfig::load_from("does/not/exist.toml");
        std::env::remove_var("EXCEPTIONAL_BUFFER__CAPACITY");

        assert_eq!(config.unwrap().buffer.capacity, 1024);
    }

    #[test]
    #[serial]
    fn test_toml_output_loads_back() {
        let mut config = ExceptionalConfig::default();
        config.buffer.capacity = 2048;
        config.logging.format = LogFormat::Compact;
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[writer]"));

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("rendered.toml");
        std::fs::write(&path, rendered).unwrap();
        assert_eq!(ExceptionalConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ExceptionalConfig::default();
        config.buffer.capacity = MAX_SHARED_CAPACITY + 1;
        assert!(matches!(
            config.validate(),
            Err(RingError::Configuration(_))
        ));

        let mut config = ExceptionalConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = ExceptionalConfig::default();
        config.writer.idle_wait_millis = 0;
        assert!(config.validate().is_err());

        let mut config = ExceptionalConfig::default();
        config.store.path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
