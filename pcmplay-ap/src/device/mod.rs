//! Output device abstraction
//!
//! [`PcmSink`] is the capability surface the player negotiates against and
//! streams into. Hardware parameters are set step by step on the sink and
//! become effective only on [`PcmSink::commit_hw_params`]; software parameters
//! follow the same pattern with [`PcmSink::commit_sw_params`].
//!
//! Backends:
//! - [`cpal_sink::CpalSink`]: real output device through cpal
//! - [`memory::MemorySink`]: in-memory device with configurable capabilities
//!   and fault injection (tests, dry runs)

pub mod cpal_sink;
pub mod memory;

use crate::audio::{AccessMode, SampleFormat};
use std::ops::RangeInclusive;
use thiserror::Error;

pub use cpal_sink::CpalSink;
pub use memory::{MemorySink, MemorySinkOptions, WriteCall, WriteOutcome};

/// Device name selecting the in-memory sink
pub const MEMORY_DEVICE_NAME: &str = "memory";

/// Errors reported by a sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Requested value is outside what the device supports
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// Operation called out of order (e.g. writing before commit)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Device cannot accept data right now; try again
    #[error("resource temporarily unavailable")]
    WouldBlock,

    /// Device or backend failure
    #[error("device error: {0}")]
    Device(String),
}

impl SinkError {
    /// Whether the same call may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::WouldBlock)
    }
}

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Parameter ranges a device supports before any restriction is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwCapabilities {
    pub access_modes: Vec<AccessMode>,
    pub formats: Vec<SampleFormat>,
    pub channels: RangeInclusive<u16>,
    pub rates: RangeInclusive<u32>,
    /// Period (callback) size range in frames, if the device reports one
    pub period_frames: Option<RangeInclusive<usize>>,
}

/// Software parameters as currently set on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwParams {
    pub start_threshold: usize,
    pub avail_min: usize,
}

/// Capability-negotiating PCM output device.
///
/// Setters restrict the pending hardware configuration. The `*_near` setters
/// return the closest value the device supports, which the caller must check.
/// Writes take interleaved frames and return how many frames were accepted,
/// which may be fewer than offered.
pub trait PcmSink {
    /// Human-readable device name for logs
    fn name(&self) -> String;

    /// Reset the pending configuration to the full capability space
    fn hw_params_any(&mut self) -> SinkResult<HwCapabilities>;

    fn set_rate_resample(&mut self, enable: bool) -> SinkResult<()>;

    fn set_access(&mut self, access: AccessMode) -> SinkResult<()>;

    fn set_format(&mut self, format: SampleFormat) -> SinkResult<()>;

    fn set_channels(&mut self, channels: u16) -> SinkResult<()>;

    /// Returns the rate the device will actually use
    fn set_rate_near(&mut self, rate: u32) -> SinkResult<u32>;

    /// Returns the buffer time in microseconds the device will actually use
    fn set_buffer_time_near(&mut self, buffer_time_us: u32) -> SinkResult<u32>;

    /// Ring buffer size in frames for the pending configuration
    fn buffer_size(&self) -> SinkResult<usize>;

    /// Returns the period time in microseconds the device will actually use
    fn set_period_time_near(&mut self, period_time_us: u32) -> SinkResult<u32>;

    /// Period size in frames for the pending configuration
    fn period_size(&self) -> SinkResult<usize>;

    /// Apply the pending hardware configuration
    fn commit_hw_params(&mut self) -> SinkResult<()>;

    /// Software parameters currently in effect
    fn sw_params_current(&mut self) -> SinkResult<SwParams>;

    fn set_start_threshold(&mut self, frames: usize) -> SinkResult<()>;

    fn set_avail_min(&mut self, frames: usize) -> SinkResult<()>;

    /// Apply the pending software parameters
    fn commit_sw_params(&mut self) -> SinkResult<()>;

    /// Write up to `frames` interleaved frames from `data`.
    ///
    /// Returns frames accepted, [`SinkError::WouldBlock`] if the device is
    /// busy, or any other error if the stream is broken.
    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> SinkResult<usize>;

    /// Block until queued frames have been played
    fn drain(&mut self) -> SinkResult<()>;

    /// Stop the stream and release the device
    fn close(&mut self) -> SinkResult<()>;
}

impl<S: PcmSink + ?Sized> PcmSink for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }
    fn hw_params_any(&mut self) -> SinkResult<HwCapabilities> {
        (**self).hw_params_any()
    }
    fn set_rate_resample(&mut self, enable: bool) -> SinkResult<()> {
        (**self).set_rate_resample(enable)
    }
    fn set_access(&mut self, access: AccessMode) -> SinkResult<()> {
        (**self).set_access(access)
    }
    fn set_format(&mut self, format: SampleFormat) -> SinkResult<()> {
        (**self).set_format(format)
    }
    fn set_channels(&mut self, channels: u16) -> SinkResult<()> {
        (**self).set_channels(channels)
    }
    fn set_rate_near(&mut self, rate: u32) -> SinkResult<u32> {
        (**self).set_rate_near(rate)
    }
    fn set_buffer_time_near(&mut self, buffer_time_us: u32) -> SinkResult<u32> {
        (**self).set_buffer_time_near(buffer_time_us)
    }
    fn buffer_size(&self) -> SinkResult<usize> {
        (**self).buffer_size()
    }
    fn set_period_time_near(&mut self, period_time_us: u32) -> SinkResult<u32> {
        (**self).set_period_time_near(period_time_us)
    }
    fn period_size(&self) -> SinkResult<usize> {
        (**self).period_size()
    }
    fn commit_hw_params(&mut self) -> SinkResult<()> {
        (**self).commit_hw_params()
    }
    fn sw_params_current(&mut self) -> SinkResult<SwParams> {
        (**self).sw_params_current()
    }
    fn set_start_threshold(&mut self, frames: usize) -> SinkResult<()> {
        (**self).set_start_threshold(frames)
    }
    fn set_avail_min(&mut self, frames: usize) -> SinkResult<()> {
        (**self).set_avail_min(frames)
    }
    fn commit_sw_params(&mut self) -> SinkResult<()> {
        (**self).commit_sw_params()
    }
    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
        (**self).write_interleaved(data, frames)
    }
    fn drain(&mut self) -> SinkResult<()> {
        (**self).drain()
    }
    fn close(&mut self) -> SinkResult<()> {
        (**self).close()
    }
}

/// Microseconds to frames at `rate`, rounded to nearest
pub fn time_to_frames(time_us: u32, rate: u32) -> usize {
    ((u64::from(time_us) * u64::from(rate) + 500_000) / 1_000_000) as usize
}

/// Frames to microseconds at `rate`, rounded to nearest
pub fn frames_to_time(frames: usize, rate: u32) -> u32 {
    if rate == 0 {
        return 0;
    }
    let rate = u64::from(rate);
    ((frames as u64 * 1_000_000 + rate / 2) / rate).min(u64::from(u32::MAX)) as u32
}
