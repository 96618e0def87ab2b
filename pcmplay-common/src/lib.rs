//! # pcmplay Common Library
//!
//! Shared code for the pcmplay crates:
//! - Common error type
//! - TOML bootstrap configuration and config file resolution
//! - Logging (tracing subscriber) initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
