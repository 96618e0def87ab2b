//! # pcmplay audio player library (pcmplay-ap)
//!
//! Plays canonical PCM WAV files through a capability-negotiating output
//! device.
//!
//! **Pipeline:** header parse → hardware negotiation → software negotiation →
//! period-at-a-time streaming → device release
//!
//! **Backends:** cpal (hardware output) and an in-memory sink

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod playback;
pub mod wav;

pub use config::{PlayerConfig, RequestSource};
pub use error::{Error, Result};
pub use playback::{CancelToken, PlaybackReport, Player};
