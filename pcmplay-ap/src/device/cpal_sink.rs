//! Audio output using cpal
//!
//! cpal drives output through a callback, so the blocking write interface is
//! built on a lock-free byte ring buffer sized to the negotiated buffer:
//!
//! ```text
//! write_interleaved() → HeapProd<u8> ─ ring (buffer_frames) ─ HeapCons<u8> → cpal callback → device
//! ```
//!
//! The cpal callback size is the negotiated period. The stream is started once
//! the ring holds `start_threshold` frames (or on drain), and writers wait for
//! `avail_min` free frames. Stream errors reported by cpal are latched and fail
//! the next write.

use super::{
    frames_to_time, time_to_frames, HwCapabilities, PcmSink, SinkError, SinkResult, SwParams,
};
use crate::audio::{AccessMode, SampleFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SizedSample, Stream, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Output device name and its capabilities, for device listings
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub capabilities: Option<HwCapabilities>,
}

fn to_cpal_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format {
        SampleFormat::U8 => Some(cpal::SampleFormat::U8),
        SampleFormat::S16Le => Some(cpal::SampleFormat::I16),
        SampleFormat::S32Le => Some(cpal::SampleFormat::I32),
        // cpal has no packed 24-bit output format
        SampleFormat::S24Le => None,
    }
}

fn from_cpal_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleFormat::U8),
        cpal::SampleFormat::I16 => Some(SampleFormat::S16Le),
        cpal::SampleFormat::I32 => Some(SampleFormat::S32Le),
        _ => None,
    }
}

fn capabilities_of(ranges: &[SupportedStreamConfigRange]) -> HwCapabilities {
    let mut formats: Vec<SampleFormat> = Vec::new();
    for f in ranges.iter().filter_map(|r| from_cpal_format(r.sample_format())) {
        if !formats.contains(&f) {
            formats.push(f);
        }
    }
    let min_ch = ranges.iter().map(|r| r.channels()).min().unwrap_or(0);
    let max_ch = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);
    let min_rate = ranges.iter().map(|r| r.min_sample_rate().0).min().unwrap_or(0);
    let max_rate = ranges.iter().map(|r| r.max_sample_rate().0).max().unwrap_or(0);
    let period_frames = ranges
        .iter()
        .filter_map(|r| match r.buffer_size() {
            SupportedBufferSize::Range { min, max } => Some((*min as usize, *max as usize)),
            SupportedBufferSize::Unknown => None,
        })
        .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
        .map(|(min, max)| min..=max);

    HwCapabilities {
        access_modes: vec![AccessMode::RwInterleaved],
        formats,
        channels: min_ch..=max_ch,
        rates: min_rate..=max_rate,
        period_frames,
    }
}

/// cpal-backed [`PcmSink`]
pub struct CpalSink {
    device: Device,
    device_name: String,
    ranges: Vec<SupportedStreamConfigRange>,
    nonblocking: bool,

    // Pending hardware configuration
    resample: bool,
    access: Option<AccessMode>,
    format: Option<SampleFormat>,
    channels: Option<u16>,
    rate: Option<u32>,
    buffer_frames: Option<usize>,
    period_frames: Option<usize>,

    sw: SwParams,
    sw_pending: SwParams,

    // Live stream state
    producer: Option<HeapProd<u8>>,
    stream: Option<Stream>,
    playing: bool,
    /// Set by the cpal error callback
    error_flag: Arc<AtomicBool>,
    /// Callbacks that found the ring short of data
    underruns: Arc<AtomicU64>,
}

impl CpalSink {
    /// List output devices with their capability ranges
    pub fn list_devices() -> SinkResult<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices: Vec<DeviceInfo> = host
            .output_devices()
            .map_err(|e| SinkError::Device(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| {
                let name = device.name().ok()?;
                let capabilities = device
                    .supported_output_configs()
                    .ok()
                    .map(|configs| capabilities_of(&configs.collect::<Vec<_>>()));
                Some(DeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    capabilities,
                })
            })
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device by name, falling back to the default device.
    ///
    /// `nonblocking` makes writes report "try again" instead of waiting for
    /// free ring space.
    pub fn open(device_name: Option<&str>, nonblocking: bool) -> SinkResult<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| SinkError::Device(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            SinkError::Device(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| SinkError::Device("No default output device found".into()))?,
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", device_name);

        Ok(Self {
            device,
            device_name,
            ranges: Vec::new(),
            nonblocking,
            resample: true,
            access: None,
            format: None,
            channels: None,
            rate: None,
            buffer_frames: None,
            period_frames: None,
            sw: SwParams::default(),
            sw_pending: SwParams::default(),
            producer: None,
            stream: None,
            playing: false,
            error_flag: Arc::new(AtomicBool::new(false)),
            underruns: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Callbacks so far that had to pad with silence
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Supported ranges compatible with the format/channels chosen so far
    fn matching_ranges(&self) -> impl Iterator<Item = &SupportedStreamConfigRange> {
        let format = self.format.and_then(to_cpal_format);
        let channels = self.channels;
        self.ranges.iter().filter(move |r| {
            format.map_or(true, |f| r.sample_format() == f)
                && channels.map_or(true, |c| r.channels() == c)
        })
    }

    fn frame_bytes(&self) -> usize {
        match (self.channels, self.format) {
            (Some(ch), Some(f)) => usize::from(ch) * f.bytes_per_sample(),
            _ => 0,
        }
    }

    fn period_duration(&self) -> Duration {
        let rate = u64::from(self.rate.unwrap_or(44_100).max(1));
        let frames = self.period_frames.unwrap_or(1) as u64;
        Duration::from_micros((frames * 1_000_000 / rate).max(100))
    }

    fn buffer_duration(&self) -> Duration {
        let rate = u64::from(self.rate.unwrap_or(44_100).max(1));
        let frames = self.buffer_frames.unwrap_or(1) as u64;
        Duration::from_micros(frames * 1_000_000 / rate)
    }

    fn vacant_frames(&self) -> usize {
        match (&self.producer, self.frame_bytes()) {
            (Some(p), fb) if fb > 0 => p.vacant_len() / fb,
            _ => 0,
        }
    }

    fn occupied_frames(&self) -> usize {
        match (&self.producer, self.frame_bytes()) {
            (Some(p), fb) if fb > 0 => p.occupied_len() / fb,
            _ => 0,
        }
    }

    fn check_stream(&self) -> SinkResult<()> {
        if self.error_flag.load(Ordering::SeqCst) {
            return Err(SinkError::Device("output stream reported an error".into()));
        }
        Ok(())
    }

    fn start(&mut self) -> SinkResult<()> {
        if self.playing {
            return Ok(());
        }
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| SinkError::InvalidState("hardware parameters not committed".into()))?;
        stream
            .play()
            .map_err(|e| SinkError::Device(format!("Failed to start stream: {}", e)))?;
        self.playing = true;
        debug!("Output stream started with {} frames queued", self.occupied_frames());
        Ok(())
    }

    /// Build the output stream for sample type `T`, decoding little-endian
    /// bytes from the ring with `decode`
    fn build_stream<T, D>(
        &self,
        config: &StreamConfig,
        mut consumer: HeapCons<u8>,
        decode: D,
    ) -> SinkResult<Stream>
    where
        T: SizedSample + Send + 'static,
        D: Fn(&[u8]) -> T + Send + 'static,
    {
        let bytes_per_sample = std::mem::size_of::<T>();
        let error_flag = Arc::clone(&self.error_flag);
        let underruns = Arc::clone(&self.underruns);
        let mut scratch: Vec<u8> = vec![0; self.period_frames.unwrap_or(0) * self.frame_bytes()];

        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let wanted = data.len() * bytes_per_sample;
                    if scratch.len() < wanted {
                        scratch.resize(wanted, 0);
                    }
                    let got = consumer.pop_slice(&mut scratch[..wanted]) / bytes_per_sample;

                    for (out, bytes) in data.iter_mut().zip(scratch.chunks_exact(bytes_per_sample)).take(got) {
                        *out = decode(bytes);
                    }
                    if got < data.len() {
                        for out in &mut data[got..] {
                            *out = T::EQUILIBRIUM;
                        }
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| SinkError::Device(format!("Failed to build stream: {}", e)))
    }
}

impl PcmSink for CpalSink {
    fn name(&self) -> String {
        self.device_name.clone()
    }

    fn hw_params_any(&mut self) -> SinkResult<HwCapabilities> {
        self.ranges = self
            .device
            .supported_output_configs()
            .map_err(|e| SinkError::Device(format!("Failed to get device configs: {}", e)))?
            .collect();
        if self.ranges.is_empty() {
            return Err(SinkError::Unsupported("device reports no output configurations".into()));
        }
        self.access = None;
        self.format = None;
        self.channels = None;
        self.rate = None;
        self.buffer_frames = None;
        self.period_frames = None;
        Ok(capabilities_of(&self.ranges))
    }

    fn set_rate_resample(&mut self, enable: bool) -> SinkResult<()> {
        // cpal never resamples; only exact rates inside a supported range work
        if enable {
            debug!("Resampling requested, device rates are used as reported");
        }
        self.resample = enable;
        Ok(())
    }

    fn set_access(&mut self, access: AccessMode) -> SinkResult<()> {
        match access {
            AccessMode::RwInterleaved => {
                self.access = Some(access);
                Ok(())
            }
            AccessMode::MmapInterleaved => Err(SinkError::Unsupported(
                "memory-mapped access is not available through cpal".into(),
            )),
        }
    }

    fn set_format(&mut self, format: SampleFormat) -> SinkResult<()> {
        let cpal_format = to_cpal_format(format)
            .ok_or_else(|| SinkError::Unsupported(format!("sample format {}", format)))?;
        if !self.ranges.iter().any(|r| r.sample_format() == cpal_format) {
            return Err(SinkError::Unsupported(format!("sample format {}", format)));
        }
        self.format = Some(format);
        Ok(())
    }

    fn set_channels(&mut self, channels: u16) -> SinkResult<()> {
        let previous = self.channels.replace(channels);
        if self.matching_ranges().next().is_none() {
            self.channels = previous;
            return Err(SinkError::Unsupported(format!("{} channels", channels)));
        }
        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> SinkResult<u32> {
        let actual = self
            .matching_ranges()
            .map(|r| rate.clamp(r.min_sample_rate().0, r.max_sample_rate().0))
            .min_by_key(|candidate| candidate.abs_diff(rate))
            .ok_or_else(|| SinkError::Unsupported("no configuration for format/channels".into()))?;
        self.rate = Some(actual);
        Ok(actual)
    }

    fn set_buffer_time_near(&mut self, buffer_time_us: u32) -> SinkResult<u32> {
        let rate = self
            .rate
            .ok_or_else(|| SinkError::InvalidState("rate must be set before timing".into()))?;
        let frames = time_to_frames(buffer_time_us, rate).max(1);
        self.buffer_frames = Some(frames);
        Ok(frames_to_time(frames, rate))
    }

    fn buffer_size(&self) -> SinkResult<usize> {
        self.buffer_frames
            .ok_or_else(|| SinkError::InvalidState("buffer time not set".into()))
    }

    fn set_period_time_near(&mut self, period_time_us: u32) -> SinkResult<u32> {
        let rate = self
            .rate
            .ok_or_else(|| SinkError::InvalidState("rate must be set before timing".into()))?;
        let buffer = self.buffer_size()?;
        let mut frames = time_to_frames(period_time_us, rate).clamp(1, buffer);

        // The period is the cpal callback size, bounded by the device range
        let bounds = self
            .matching_ranges()
            .filter_map(|r| match r.buffer_size() {
                SupportedBufferSize::Range { min, max } => Some((*min as usize, *max as usize)),
                SupportedBufferSize::Unknown => None,
            })
            .next();
        if let Some((min, max)) = bounds {
            frames = frames.clamp(min, max.max(min));
            if frames > buffer {
                return Err(SinkError::Unsupported(format!(
                    "smallest device period ({} frames) exceeds buffer ({} frames)",
                    min, buffer
                )));
            }
        }

        self.period_frames = Some(frames);
        Ok(frames_to_time(frames, rate))
    }

    fn period_size(&self) -> SinkResult<usize> {
        self.period_frames
            .ok_or_else(|| SinkError::InvalidState("period time not set".into()))
    }

    fn commit_hw_params(&mut self) -> SinkResult<()> {
        let (Some(format), Some(channels), Some(rate), Some(buffer), Some(period)) = (
            self.format,
            self.channels,
            self.rate,
            self.buffer_frames,
            self.period_frames,
        ) else {
            return Err(SinkError::InvalidState("incomplete hardware configuration".into()));
        };
        if self.access.is_none() {
            return Err(SinkError::InvalidState("access mode not set".into()));
        }

        // Re-committing replaces any previous stream
        self.stream = None;
        self.playing = false;
        self.error_flag.store(false, Ordering::SeqCst);

        let ring = HeapRb::<u8>::new(buffer * self.frame_bytes());
        let (producer, consumer) = ring.split();

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Fixed(period as u32),
        };
        let stream = match format {
            SampleFormat::U8 => self.build_stream::<u8, _>(&config, consumer, |b| b[0])?,
            SampleFormat::S16Le => {
                self.build_stream::<i16, _>(&config, consumer, |b| i16::from_le_bytes([b[0], b[1]]))?
            }
            SampleFormat::S32Le => self.build_stream::<i32, _>(&config, consumer, |b| {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })?,
            SampleFormat::S24Le => {
                return Err(SinkError::Unsupported("sample format s24_3le".into()));
            }
        };

        debug!(
            "Audio config: sample_rate={}, channels={}, format={}, buffer={} frames, period={} frames",
            rate, channels, format, buffer, period
        );

        self.producer = Some(producer);
        self.stream = Some(stream);
        self.sw = SwParams {
            start_threshold: 1,
            avail_min: period,
        };
        Ok(())
    }

    fn sw_params_current(&mut self) -> SinkResult<SwParams> {
        if self.stream.is_none() {
            return Err(SinkError::InvalidState("hardware parameters not committed".into()));
        }
        self.sw_pending = self.sw;
        Ok(self.sw)
    }

    fn set_start_threshold(&mut self, frames: usize) -> SinkResult<()> {
        self.sw_pending.start_threshold = frames;
        Ok(())
    }

    fn set_avail_min(&mut self, frames: usize) -> SinkResult<()> {
        let buffer = self.buffer_size()?;
        if frames == 0 || frames > buffer {
            return Err(SinkError::Unsupported(format!(
                "avail_min {} outside 1..={}",
                frames, buffer
            )));
        }
        self.sw_pending.avail_min = frames;
        Ok(())
    }

    fn commit_sw_params(&mut self) -> SinkResult<()> {
        self.sw = self.sw_pending;
        Ok(())
    }

    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
        self.check_stream()?;
        if self.producer.is_none() {
            return Err(SinkError::InvalidState("hardware parameters not committed".into()));
        }
        let frame_bytes = self.frame_bytes();
        let frames = frames.min(data.len() / frame_bytes.max(1));
        if frames == 0 {
            return Ok(0);
        }

        // Wait for avail_min free frames (or fewer if that is all we have)
        let wanted = self.sw.avail_min.clamp(1, frames);
        let deadline = Instant::now() + self.buffer_duration() * 10 + Duration::from_secs(1);
        while self.vacant_frames() < wanted {
            if !self.playing {
                // Ring is full below the start threshold
                self.start()?;
            }
            if self.nonblocking {
                return Err(SinkError::WouldBlock);
            }
            if Instant::now() > deadline {
                return Err(SinkError::Device("device stopped consuming samples".into()));
            }
            std::thread::sleep(self.period_duration() / 4);
            self.check_stream()?;
        }

        let accepted = self.vacant_frames().min(frames);
        let pushed = match self.producer.as_mut() {
            Some(p) => p.push_slice(&data[..accepted * frame_bytes]) / frame_bytes,
            None => 0,
        };

        if !self.playing && self.occupied_frames() >= self.sw.start_threshold {
            self.start()?;
        }
        Ok(pushed)
    }

    fn drain(&mut self) -> SinkResult<()> {
        if self.producer.is_none() {
            return Ok(());
        }
        if self.occupied_frames() > 0 {
            self.start()?;
        }
        let deadline = Instant::now() + self.buffer_duration() * 4 + Duration::from_secs(1);
        while self.occupied_frames() > 0 {
            self.check_stream()?;
            if Instant::now() > deadline {
                return Err(SinkError::Device("timed out draining output".into()));
            }
            std::thread::sleep(self.period_duration() / 2);
        }
        // Last callback still has its period in flight
        std::thread::sleep(self.period_duration());
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| SinkError::Device(format!("Failed to pause stream: {}", e)))?;
        }
        self.producer = None;
        self.playing = false;
        let underruns = self.underrun_count();
        if underruns > 0 {
            warn!("{} output callbacks ran short of data", underruns);
        }
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        // Ensure stream is stopped on drop
        let _ = self.close();
    }
}
