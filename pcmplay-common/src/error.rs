//! Common error types for pcmplay

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for pcmplay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the pcmplay crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be read
    #[error("Configuration error: cannot read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML or has wrongly typed fields
    #[error("Configuration error: invalid TOML in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracing subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}
