//! Test helper modules for pcmplay-ap integration tests
//!
//! - audio_generator: hound-written WAV fixtures plus raw header builders
//! - sinks: pre-configured in-memory sinks

#![allow(dead_code, unused_imports)]

pub mod audio_generator;
pub mod sinks;

pub use audio_generator::{
    generate_ramp_wav, generate_silent_wav, ramp_payload, write_raw_wav, WavFixtures,
};
pub use sinks::{memory_sink, period_sink};
