//! Typed player configuration
//!
//! Built from the TOML bootstrap config, then adjusted by command-line
//! overrides. Passed explicitly to the session; nothing here is global.

use crate::audio::{AccessMode, AvailMinMode, HardwareRequest, SampleFormat};
use crate::error::{Error, Result};
use crate::playback::RetryPolicy;
use crate::wav::WavHeader;
use pcmplay_common::config::TomlConfig;
use std::time::Duration;

/// Where the channel/rate/format of the hardware request come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    /// From the WAV header of the file being played
    Header,
    /// Fixed values from configuration, whatever the file says
    Fixed {
        sample_format: SampleFormat,
        channel_count: u16,
        rate: u32,
    },
}

/// Everything a playback session needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Output device; `None` uses the host default
    pub device_name: Option<String>,
    pub nonblocking: bool,
    pub resample: bool,
    pub access_mode: AccessMode,
    pub buffer_time_us: u32,
    pub period_time_us: u32,
    pub request_source: RequestSource,
    pub avail_min: AvailMinMode,
    /// Stop at the header's data_size rather than end of file
    pub stop_at_data_size: bool,
    pub retry: RetryPolicy,
    /// Stop after this many seconds of audio
    pub duration_secs: Option<f64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            nonblocking: false,
            resample: true,
            access_mode: AccessMode::RwInterleaved,
            buffer_time_us: 20_000,
            period_time_us: 2_000,
            request_source: RequestSource::Header,
            avail_min: AvailMinMode::Period,
            stop_at_data_size: true,
            retry: RetryPolicy::default(),
            duration_secs: None,
        }
    }
}

impl PlayerConfig {
    /// Validate and convert the TOML configuration
    pub fn from_toml(toml: &TomlConfig) -> Result<Self> {
        let device = &toml.device;
        let stream = &toml.stream;

        let access_mode = device.access.parse::<AccessMode>().map_err(Error::Config)?;
        let avail_min = stream.avail_min.parse::<AvailMinMode>().map_err(Error::Config)?;

        let request_source = match stream.request_source.to_ascii_lowercase().as_str() {
            "header" => RequestSource::Header,
            "fixed" => RequestSource::Fixed {
                sample_format: stream.format.parse::<SampleFormat>().map_err(Error::Config)?,
                channel_count: stream.channels,
                rate: stream.rate,
            },
            other => {
                return Err(Error::Config(format!(
                    "unknown request_source '{}' (expected header or fixed)",
                    other
                )))
            }
        };

        let config = Self {
            device_name: device.name.clone(),
            nonblocking: device.nonblocking,
            resample: device.resample,
            access_mode,
            buffer_time_us: device.buffer_time_us,
            period_time_us: device.period_time_us,
            request_source,
            avail_min,
            stop_at_data_size: stream.stop_at_data_size,
            retry: RetryPolicy {
                max_busy_retries: stream.busy_retry_limit,
                backoff: Duration::from_micros(stream.busy_backoff_us),
            },
            duration_secs: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values no device could honour
    pub fn validate(&self) -> Result<()> {
        if self.buffer_time_us == 0 || self.period_time_us == 0 {
            return Err(Error::Config("buffer_time_us and period_time_us must be positive".into()));
        }
        if self.period_time_us > self.buffer_time_us {
            return Err(Error::Config(format!(
                "period_time_us ({}) exceeds buffer_time_us ({})",
                self.period_time_us, self.buffer_time_us
            )));
        }
        if let RequestSource::Fixed {
            channel_count, rate, ..
        } = self.request_source
        {
            if channel_count == 0 || rate == 0 {
                return Err(Error::Config("fixed channels and rate must be positive".into()));
            }
        }
        if let Some(secs) = self.duration_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::Config(format!("duration must be positive, got {}", secs)));
            }
        }
        Ok(())
    }

    /// Hardware request for a file with `header`.
    ///
    /// # Errors
    /// [`Error::UnsupportedFormat`] if the header's bit depth has no sample
    /// format (header-derived requests only).
    pub fn hardware_request(&self, header: &WavHeader) -> Result<HardwareRequest> {
        let (sample_format, channel_count, rate) = match self.request_source {
            RequestSource::Header => {
                let format = SampleFormat::from_bits_per_sample(header.bits_per_sample).ok_or(
                    Error::UnsupportedFormat {
                        field: "bits_per_sample",
                        value: u32::from(header.bits_per_sample),
                    },
                )?;
                (format, header.channel_count, header.sample_rate)
            }
            RequestSource::Fixed {
                sample_format,
                channel_count,
                rate,
            } => (sample_format, channel_count, rate),
        };

        Ok(HardwareRequest {
            resample: self.resample,
            access_mode: self.access_mode,
            sample_format,
            channel_count,
            rate,
            buffer_time_us: self.buffer_time_us,
            period_time_us: self.period_time_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcmplay_common::config::parse_toml_config;
    use std::path::Path;

    #[test]
    fn test_defaults_match_toml_defaults() {
        let from_toml = PlayerConfig::from_toml(&TomlConfig::default()).unwrap();
        assert_eq!(from_toml, PlayerConfig::default());
    }

    #[test]
    fn test_fixed_request_ignores_header() {
        let toml = parse_toml_config(
            r#"
[device]
access = "mmap_interleaved"
buffer_time_us = 500000
period_time_us = 100000

[stream]
request_source = "fixed"
channels = 2
rate = 44100
format = "s16_le"
avail_min = "buffer"
"#,
            Path::new("test.toml"),
        )
        .unwrap();
        let config = PlayerConfig::from_toml(&toml).unwrap();
        assert_eq!(config.avail_min, AvailMinMode::Buffer);

        let header = WavHeader::pcm(1, 8000, 8, 100);
        let request = config.hardware_request(&header).unwrap();
        assert_eq!(request.access_mode, AccessMode::MmapInterleaved);
        assert_eq!(request.sample_format, SampleFormat::S16Le);
        assert_eq!(request.channel_count, 2);
        assert_eq!(request.rate, 44100);
        assert_eq!(request.buffer_time_us, 500_000);
    }

    #[test]
    fn test_header_request() {
        let config = PlayerConfig::default();
        let header = WavHeader::pcm(1, 22050, 24, 300);
        let request = config.hardware_request(&header).unwrap();
        assert_eq!(request.sample_format, SampleFormat::S24Le);
        assert_eq!(request.channel_count, 1);
        assert_eq!(request.rate, 22050);
        assert!(request.resample);

        let mut odd = header;
        odd.bits_per_sample = 20;
        assert!(matches!(
            config.hardware_request(&odd),
            Err(Error::UnsupportedFormat { field: "bits_per_sample", value: 20 })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut toml = TomlConfig::default();
        toml.stream.avail_min = "half".into();
        assert!(matches!(PlayerConfig::from_toml(&toml), Err(Error::Config(_))));

        let mut toml = TomlConfig::default();
        toml.device.period_time_us = 50_000;
        assert!(matches!(PlayerConfig::from_toml(&toml), Err(Error::Config(_))));

        let mut config = PlayerConfig::default();
        config.duration_secs = Some(-1.0);
        assert!(config.validate().is_err());
    }
}
