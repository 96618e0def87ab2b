//! Core stream parameter types
//!
//! Describes what the player asks the device for ([`HardwareRequest`]) and
//! what the device actually agreed to ([`HardwareStreamConfig`],
//! [`SoftwareStreamConfig`]). Negotiated configs are plain values: created once
//! per session by the negotiator and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

/// How frames are handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Interleaved frames written into a memory-mapped ring
    MmapInterleaved,
    /// Interleaved frames passed to a (blocking) write call
    RwInterleaved,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::MmapInterleaved => f.write_str("mmap_interleaved"),
            AccessMode::RwInterleaved => f.write_str("rw_interleaved"),
        }
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mmap_interleaved" | "mmap" => Ok(AccessMode::MmapInterleaved),
            "rw_interleaved" | "rw" => Ok(AccessMode::RwInterleaved),
            other => Err(format!(
                "unknown access mode '{}' (expected rw_interleaved or mmap_interleaved)",
                other
            )),
        }
    }
}

/// Fixed-width PCM sample format, little-endian.
///
/// 8-bit WAV data is unsigned; all wider formats are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16Le,
    /// Packed 3-byte samples
    S24Le,
    S32Le,
}

impl SampleFormat {
    /// Format matching a WAV `bits_per_sample` value
    pub fn from_bits_per_sample(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(SampleFormat::U8),
            16 => Some(SampleFormat::S16Le),
            24 => Some(SampleFormat::S24Le),
            32 => Some(SampleFormat::S32Le),
            _ => None,
        }
    }

    /// Bits one sample occupies in memory
    pub fn physical_width(&self) -> u16 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::S16Le => 16,
            SampleFormat::S24Le => 24,
            SampleFormat::S32Le => 32,
        }
    }

    /// Bytes one sample occupies in memory
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.physical_width() / 8)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16_le",
            SampleFormat::S24Le => "s24_3le",
            SampleFormat::S32Le => "s32_le",
        };
        f.write_str(name)
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" => Ok(SampleFormat::U8),
            "s16_le" | "s16" => Ok(SampleFormat::S16Le),
            "s24_3le" | "s24_le" | "s24" => Ok(SampleFormat::S24Le),
            "s32_le" | "s32" => Ok(SampleFormat::S32Le),
            other => Err(format!("unknown sample format '{}'", other)),
        }
    }
}

/// Which frame count `avail_min` is set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvailMinMode {
    /// Wake the writer as soon as one period is free (low latency)
    #[default]
    Period,
    /// Wake the writer only when the whole buffer is free
    Buffer,
}

impl FromStr for AvailMinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "period" => Ok(AvailMinMode::Period),
            "buffer" => Ok(AvailMinMode::Buffer),
            other => Err(format!(
                "unknown avail_min mode '{}' (expected period or buffer)",
                other
            )),
        }
    }
}

impl fmt::Display for AvailMinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailMinMode::Period => f.write_str("period"),
            AvailMinMode::Buffer => f.write_str("buffer"),
        }
    }
}

/// Parameters the player asks the device for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRequest {
    /// Allow the device to resample
    pub resample: bool,
    pub access_mode: AccessMode,
    pub sample_format: SampleFormat,
    pub channel_count: u16,
    pub rate: u32,
    /// Requested ring buffer length in microseconds
    pub buffer_time_us: u32,
    /// Requested period length in microseconds
    pub period_time_us: u32,
}

/// Hardware parameters after negotiation.
///
/// `actual_rate` always equals `requested_rate`: the negotiator fails rather
/// than accept a substituted rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareStreamConfig {
    pub access_mode: AccessMode,
    pub sample_format: SampleFormat,
    pub channel_count: u16,
    pub requested_rate: u32,
    pub actual_rate: u32,
    pub buffer_time_us: u32,
    pub actual_buffer_time_us: u32,
    pub actual_buffer_frames: usize,
    pub period_time_us: u32,
    pub actual_period_time_us: u32,
    pub actual_period_frames: usize,
}

impl HardwareStreamConfig {
    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channel_count) * self.sample_format.bytes_per_sample()
    }

    /// Bytes per period: the size of the writer's sample buffer
    pub fn period_bytes(&self) -> usize {
        self.actual_period_frames * self.frame_bytes()
    }

    /// Bytes held by the device ring buffer
    pub fn buffer_bytes(&self) -> usize {
        self.actual_buffer_frames * self.frame_bytes()
    }

    /// Physical sample width in bits
    pub fn physical_width(&self) -> u16 {
        self.sample_format.physical_width()
    }

    /// Convert a duration in seconds to a frame count at the negotiated rate
    pub fn frames_for_secs(&self, secs: f64) -> u64 {
        (secs.max(0.0) * f64::from(self.actual_rate)).round() as u64
    }
}

/// Software parameters after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareStreamConfig {
    /// Frames that must be queued before the device starts playing
    pub start_threshold_frames: usize,
    /// Free frames required before the device reports it is ready for more
    pub avail_min_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(format: SampleFormat, channels: u16, period: usize) -> HardwareStreamConfig {
        HardwareStreamConfig {
            access_mode: AccessMode::RwInterleaved,
            sample_format: format,
            channel_count: channels,
            requested_rate: 44100,
            actual_rate: 44100,
            buffer_time_us: 20_000,
            actual_buffer_time_us: 20_000,
            actual_buffer_frames: period * 10,
            period_time_us: 2_000,
            actual_period_time_us: 2_000,
            actual_period_frames: period,
        }
    }

    #[test]
    fn test_period_bytes_follows_frame_size() {
        assert_eq!(config(SampleFormat::S16Le, 2, 88).period_bytes(), 88 * 4);
        assert_eq!(config(SampleFormat::S24Le, 2, 88).period_bytes(), 88 * 6);
        assert_eq!(config(SampleFormat::U8, 1, 88).period_bytes(), 88);
        assert_eq!(config(SampleFormat::S32Le, 6, 10).buffer_bytes(), 100 * 24);
    }

    #[test]
    fn test_format_from_bits() {
        assert_eq!(SampleFormat::from_bits_per_sample(16), Some(SampleFormat::S16Le));
        assert_eq!(SampleFormat::from_bits_per_sample(24), Some(SampleFormat::S24Le));
        assert_eq!(SampleFormat::from_bits_per_sample(12), None);
        assert_eq!(SampleFormat::S24Le.physical_width(), 24);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("S16_LE".parse::<SampleFormat>(), Ok(SampleFormat::S16Le));
        assert_eq!("mmap".parse::<AccessMode>(), Ok(AccessMode::MmapInterleaved));
        assert_eq!("buffer".parse::<AvailMinMode>(), Ok(AvailMinMode::Buffer));
        assert!("planar".parse::<AccessMode>().is_err());
    }

    #[test]
    fn test_frames_for_secs() {
        let hw = config(SampleFormat::S16Le, 2, 88);
        assert_eq!(hw.frames_for_secs(1.0), 44_100);
        assert_eq!(hw.frames_for_secs(0.5), 22_050);
        assert_eq!(hw.frames_for_secs(-3.0), 0);
    }
}
