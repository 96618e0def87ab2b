//! Bootstrap configuration loading and config file resolution
//!
//! Configuration is read once at startup from a TOML file. Every field has a
//! built-in default, so an empty file (or no file at all) yields a working
//! configuration matching the reference playback setup:
//! 44.1 kHz, stereo, S16_LE, 20 ms ring buffer, 2 ms periods.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`PCMPLAY_CONFIG`)
//! 3. Per-user config file (`<config_dir>/pcmplay/config.toml`)
//! 4. Built-in defaults
//!
//! A missing per-user file is not an error. A file named explicitly on the
//! command line or in the environment must exist and parse.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PCMPLAY_CONFIG";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Output device selection and hardware timing requests
    #[serde(default)]
    pub device: DeviceSection,

    /// Stream format request and streaming loop tuning
    #[serde(default)]
    pub stream: StreamSection,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Reject level names tracing does not know
    pub fn validate(&self) -> Result<()> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            other => Err(Error::Config(format!("unknown log level '{}'", other))),
        }
    }
}

/// `[device]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Output device name ("memory" selects the in-memory sink).
    /// `None` selects the host default output device.
    #[serde(default)]
    pub name: Option<String>,

    /// Allow the device to resample
    #[serde(default = "default_true")]
    pub resample: bool,

    /// Access mode: "rw_interleaved" or "mmap_interleaved"
    #[serde(default = "default_access")]
    pub access: String,

    /// Return "try again" from writes instead of blocking
    #[serde(default)]
    pub nonblocking: bool,

    /// Requested ring buffer length in microseconds
    #[serde(default = "default_buffer_time_us")]
    pub buffer_time_us: u32,

    /// Requested period length in microseconds
    #[serde(default = "default_period_time_us")]
    pub period_time_us: u32,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: None,
            resample: true,
            access: default_access(),
            nonblocking: false,
            buffer_time_us: default_buffer_time_us(),
            period_time_us: default_period_time_us(),
        }
    }
}

/// `[stream]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StreamSection {
    /// Where the hardware request comes from: "header" or "fixed"
    #[serde(default = "default_request_source")]
    pub request_source: String,

    /// Channel count used when `request_source = "fixed"`
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Sample rate used when `request_source = "fixed"`
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Sample format used when `request_source = "fixed"` (e.g. "s16_le")
    #[serde(default = "default_format")]
    pub format: String,

    /// avail_min mode: "period" (low latency) or "buffer"
    #[serde(default = "default_avail_min")]
    pub avail_min: String,

    /// Stop reading at the header's declared data size instead of end of file
    #[serde(default = "default_true")]
    pub stop_at_data_size: bool,

    /// Maximum consecutive "try again" results for a single write
    #[serde(default = "default_busy_retry_limit")]
    pub busy_retry_limit: u32,

    /// Pause between busy retries in microseconds (0 = yield the thread)
    #[serde(default)]
    pub busy_backoff_us: u64,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            request_source: default_request_source(),
            channels: default_channels(),
            rate: default_rate(),
            format: default_format(),
            avail_min: default_avail_min(),
            stop_at_data_size: true,
            busy_retry_limit: default_busy_retry_limit(),
            busy_backoff_us: 0,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_access() -> String {
    "rw_interleaved".to_string()
}

fn default_buffer_time_us() -> u32 {
    20_000
}

fn default_period_time_us() -> u32 {
    2_000
}

fn default_request_source() -> String {
    "header".to_string()
}

fn default_channels() -> u16 {
    2
}

fn default_rate() -> u32 {
    44_100
}

fn default_format() -> String {
    "s16_le".to_string()
}

fn default_avail_min() -> String {
    "period".to_string()
}

fn default_busy_retry_limit() -> u32 {
    10_000
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// File named on the command line
    CommandLine(PathBuf),
    /// File named by `PCMPLAY_CONFIG`
    Environment(PathBuf),
    /// Per-user config file
    UserFile(PathBuf),
    /// No file found, built-in defaults
    Defaults,
}

/// Configuration together with its origin
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: TomlConfig,
    pub source: ConfigSource,
}

/// Parse a TOML string into a configuration
pub fn parse_toml_config(content: &str, origin: &Path) -> Result<TomlConfig> {
    let config: TomlConfig = toml::from_str(content).map_err(|source| Error::ConfigParse {
        path: origin.to_path_buf(),
        source,
    })?;
    config.logging.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml_config(&content, path)
}

/// Per-user config file location for the platform
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pcmplay").join("config.toml"))
}

/// Resolve and load the configuration following the priority order above
pub fn resolve_config(cli_arg: Option<&Path>) -> Result<ResolvedConfig> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        info!("Loading configuration from {}", path.display());
        return Ok(ResolvedConfig {
            config: load_toml_config(path)?,
            source: ConfigSource::CommandLine(path.to_path_buf()),
        });
    }

    // Priority 2: Environment variable
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(path);
        info!("Loading configuration from {} ({})", path.display(), CONFIG_ENV_VAR);
        return Ok(ResolvedConfig {
            config: load_toml_config(&path)?,
            source: ConfigSource::Environment(path),
        });
    }

    // Priority 3: Per-user config file
    if let Some(path) = user_config_path() {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            return Ok(ResolvedConfig {
                config: load_toml_config(&path)?,
                source: ConfigSource::UserFile(path),
            });
        }
        debug!("No config file at {}", path.display());
    } else {
        warn!("Could not determine config directory for this platform");
    }

    // Priority 4: Built-in defaults
    Ok(ResolvedConfig {
        config: TomlConfig::default(),
        source: ConfigSource::Defaults,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = parse_toml_config("", Path::new("empty.toml")).unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.device.buffer_time_us, 20_000);
        assert_eq!(config.device.period_time_us, 2_000);
        assert_eq!(config.stream.rate, 44_100);
        assert_eq!(config.stream.avail_min, "period");
        assert!(config.stream.stop_at_data_size);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let toml = r#"
            [device]
            period_time_us = 100000
        "#;
        let config = parse_toml_config(toml, Path::new("partial.toml")).unwrap();
        assert_eq!(config.device.period_time_us, 100_000);
        assert_eq!(config.device.buffer_time_us, 20_000);
        assert!(config.device.resample);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let err = parse_toml_config("[logging]\nlevel = \"loud\"\n", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let toml = r#"
            [stream]
            rate = "fast"
        "#;
        let err = parse_toml_config(toml, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
