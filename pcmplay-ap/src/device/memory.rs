//! In-memory output device
//!
//! Behaves like a hardware device that plays instantly: negotiation follows
//! near-match rules over a configurable capability set, and writes are
//! accepted into memory. Every write call is recorded so tests can assert on
//! exactly what reached the device.
//!
//! Fault injection knobs:
//! - `busy_writes`: the first N write calls report "try again"
//! - `max_frames_per_write`: writes accept at most this many frames
//! - `fail_on_write`: the Nth write call (1-based) fails fatally
//! - `reject_stage`: the matching negotiation step is rejected

use super::{
    frames_to_time, time_to_frames, HwCapabilities, PcmSink, SinkError, SinkResult, SwParams,
};
use crate::audio::{AccessMode, SampleFormat};
use crate::error::NegotiationStage;
use std::ops::RangeInclusive;
use tracing::{debug, trace};

/// Capabilities and fault injection settings for [`MemorySink`]
#[derive(Debug, Clone)]
pub struct MemorySinkOptions {
    pub access_modes: Vec<AccessMode>,
    pub formats: Vec<SampleFormat>,
    pub channels: RangeInclusive<u16>,
    /// Discrete supported rates; near-match picks the closest
    pub rates: Vec<u32>,
    /// Supported ring buffer sizes in frames
    pub buffer_frames: RangeInclusive<usize>,
    /// Buffer size the device insists on, whatever time is requested
    pub forced_buffer_frames: Option<usize>,
    /// Period size the device insists on, whatever time is requested
    pub forced_period_frames: Option<usize>,
    pub busy_writes: u32,
    pub max_frames_per_write: Option<usize>,
    pub fail_on_write: Option<usize>,
    pub reject_stage: Option<NegotiationStage>,
    /// Keep written bytes (disable for long dry runs)
    pub capture: bool,
}

impl Default for MemorySinkOptions {
    fn default() -> Self {
        Self {
            access_modes: vec![AccessMode::RwInterleaved, AccessMode::MmapInterleaved],
            formats: vec![
                SampleFormat::U8,
                SampleFormat::S16Le,
                SampleFormat::S24Le,
                SampleFormat::S32Le,
            ],
            channels: 1..=8,
            rates: vec![8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000],
            buffer_frames: 16..=1 << 20,
            forced_buffer_frames: None,
            forced_period_frames: None,
            busy_writes: 0,
            max_frames_per_write: None,
            fail_on_write: None,
            reject_stage: None,
            capture: true,
        }
    }
}

/// Outcome of one recorded write call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(usize),
    Busy,
    Failed,
}

/// One call to [`PcmSink::write_interleaved`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCall {
    pub requested_frames: usize,
    pub outcome: WriteOutcome,
}

/// Pending or committed hardware configuration
#[derive(Debug, Clone, Default)]
struct HwState {
    resample: Option<bool>,
    access: Option<AccessMode>,
    format: Option<SampleFormat>,
    channels: Option<u16>,
    rate: Option<u32>,
    buffer_frames: Option<usize>,
    period_frames: Option<usize>,
}

/// In-memory [`PcmSink`]
#[derive(Debug)]
pub struct MemorySink {
    options: MemorySinkOptions,
    hw: HwState,
    hw_committed: bool,
    sw: SwParams,
    sw_pending: SwParams,
    sw_committed: bool,
    calls: Vec<WriteCall>,
    captured: Vec<u8>,
    frames_accepted: u64,
    busy_remaining: u32,
    started: bool,
    drained: bool,
    closed: bool,
}

impl MemorySink {
    pub fn new(options: MemorySinkOptions) -> Self {
        let busy_remaining = options.busy_writes;
        Self {
            options,
            hw: HwState::default(),
            hw_committed: false,
            sw: SwParams::default(),
            sw_pending: SwParams::default(),
            sw_committed: false,
            calls: Vec::new(),
            captured: Vec::new(),
            frames_accepted: 0,
            busy_remaining,
            started: false,
            drained: false,
            closed: false,
        }
    }

    /// Every write call in order, including busy and failed ones
    pub fn write_calls(&self) -> &[WriteCall] {
        &self.calls
    }

    /// Frame counts of the write calls that accepted data
    pub fn written_frames(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|c| match c.outcome {
                WriteOutcome::Written(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Bytes accepted so far (empty when capture is disabled)
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }

    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    pub fn resample_enabled(&self) -> Option<bool> {
        self.hw.resample
    }

    pub fn hw_committed(&self) -> bool {
        self.hw_committed
    }

    /// Software parameters in effect after the last commit
    pub fn committed_sw_params(&self) -> Option<SwParams> {
        self.sw_committed.then_some(self.sw)
    }

    /// Whether playback would have started (start threshold reached or drain)
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check(&self, stage: NegotiationStage) -> SinkResult<()> {
        if self.options.reject_stage == Some(stage) {
            return Err(SinkError::Unsupported(format!("{} refused by configuration", stage)));
        }
        if self.closed {
            return Err(SinkError::InvalidState("device closed".into()));
        }
        Ok(())
    }

    fn frame_bytes(&self) -> Option<usize> {
        Some(usize::from(self.hw.channels?) * self.hw.format?.bytes_per_sample())
    }

    fn rate(&self) -> SinkResult<u32> {
        self.hw
            .rate
            .ok_or_else(|| SinkError::InvalidState("rate must be set before timing".into()))
    }
}

impl PcmSink for MemorySink {
    fn name(&self) -> String {
        super::MEMORY_DEVICE_NAME.to_string()
    }

    fn hw_params_any(&mut self) -> SinkResult<HwCapabilities> {
        self.check(NegotiationStage::Capabilities)?;
        self.hw = HwState::default();
        self.hw_committed = false;
        self.sw_committed = false;

        let min_rate = self.options.rates.iter().copied().min().unwrap_or(0);
        let max_rate = self.options.rates.iter().copied().max().unwrap_or(0);
        Ok(HwCapabilities {
            access_modes: self.options.access_modes.clone(),
            formats: self.options.formats.clone(),
            channels: self.options.channels.clone(),
            rates: min_rate..=max_rate,
            period_frames: Some(1..=*self.options.buffer_frames.end()),
        })
    }

    fn set_rate_resample(&mut self, enable: bool) -> SinkResult<()> {
        self.check(NegotiationStage::Resample)?;
        self.hw.resample = Some(enable);
        Ok(())
    }

    fn set_access(&mut self, access: AccessMode) -> SinkResult<()> {
        self.check(NegotiationStage::Access)?;
        if !self.options.access_modes.contains(&access) {
            return Err(SinkError::Unsupported(format!("access mode {}", access)));
        }
        self.hw.access = Some(access);
        Ok(())
    }

    fn set_format(&mut self, format: SampleFormat) -> SinkResult<()> {
        self.check(NegotiationStage::Format)?;
        if !self.options.formats.contains(&format) {
            return Err(SinkError::Unsupported(format!("sample format {}", format)));
        }
        self.hw.format = Some(format);
        Ok(())
    }

    fn set_channels(&mut self, channels: u16) -> SinkResult<()> {
        self.check(NegotiationStage::Channels)?;
        if !self.options.channels.contains(&channels) {
            return Err(SinkError::Unsupported(format!("{} channels", channels)));
        }
        self.hw.channels = Some(channels);
        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> SinkResult<u32> {
        self.check(NegotiationStage::Rate)?;
        let actual = self
            .options
            .rates
            .iter()
            .copied()
            .min_by_key(|r| r.abs_diff(rate))
            .ok_or_else(|| SinkError::Unsupported("no rates available".into()))?;
        self.hw.rate = Some(actual);
        Ok(actual)
    }

    fn set_buffer_time_near(&mut self, buffer_time_us: u32) -> SinkResult<u32> {
        self.check(NegotiationStage::BufferTime)?;
        let rate = self.rate()?;
        let range = &self.options.buffer_frames;
        let frames = self.options.forced_buffer_frames.unwrap_or_else(|| {
            time_to_frames(buffer_time_us, rate).clamp(*range.start(), *range.end())
        });
        self.hw.buffer_frames = Some(frames);
        Ok(frames_to_time(frames, rate))
    }

    fn buffer_size(&self) -> SinkResult<usize> {
        if self.options.reject_stage == Some(NegotiationStage::BufferSize) {
            return Err(SinkError::Device("buffer size unavailable".into()));
        }
        self.hw
            .buffer_frames
            .ok_or_else(|| SinkError::InvalidState("buffer time not set".into()))
    }

    fn set_period_time_near(&mut self, period_time_us: u32) -> SinkResult<u32> {
        self.check(NegotiationStage::PeriodTime)?;
        let rate = self.rate()?;
        let buffer = self
            .hw
            .buffer_frames
            .ok_or_else(|| SinkError::InvalidState("buffer time must be set before period".into()))?;
        let frames = self
            .options
            .forced_period_frames
            .unwrap_or_else(|| time_to_frames(period_time_us, rate).clamp(1, buffer.max(1)));
        self.hw.period_frames = Some(frames);
        Ok(frames_to_time(frames, rate))
    }

    fn period_size(&self) -> SinkResult<usize> {
        if self.options.reject_stage == Some(NegotiationStage::PeriodSize) {
            return Err(SinkError::Device("period size unavailable".into()));
        }
        self.hw
            .period_frames
            .ok_or_else(|| SinkError::InvalidState("period time not set".into()))
    }

    fn commit_hw_params(&mut self) -> SinkResult<()> {
        self.check(NegotiationStage::CommitHardware)?;
        let hw = &self.hw;
        if hw.access.is_none()
            || hw.format.is_none()
            || hw.channels.is_none()
            || hw.rate.is_none()
            || hw.buffer_frames.is_none()
            || hw.period_frames.is_none()
        {
            return Err(SinkError::InvalidState("incomplete hardware configuration".into()));
        }
        self.hw_committed = true;
        self.sw = SwParams {
            start_threshold: 1,
            avail_min: hw.period_frames.unwrap_or(1),
        };
        debug!("memory sink committed {:?}", self.hw);
        Ok(())
    }

    fn sw_params_current(&mut self) -> SinkResult<SwParams> {
        self.check(NegotiationStage::SoftwareCurrent)?;
        if !self.hw_committed {
            return Err(SinkError::InvalidState("hardware parameters not committed".into()));
        }
        self.sw_pending = self.sw;
        Ok(self.sw)
    }

    fn set_start_threshold(&mut self, frames: usize) -> SinkResult<()> {
        self.check(NegotiationStage::StartThreshold)?;
        self.sw_pending.start_threshold = frames;
        Ok(())
    }

    fn set_avail_min(&mut self, frames: usize) -> SinkResult<()> {
        self.check(NegotiationStage::AvailMin)?;
        let buffer = self.hw.buffer_frames.unwrap_or(0);
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
        self.check(NegotiationStage::CommitSoftware)?;
        self.sw = self.sw_pending;
        self.sw_committed = true;
        Ok(())
    }

    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> SinkResult<usize> {
        if !self.hw_committed || self.closed {
            return Err(SinkError::InvalidState("device not ready for writes".into()));
        }
        let frame_bytes = self.frame_bytes().unwrap_or(1);
        let call_number = self.calls.len() + 1;

        if self.options.fail_on_write == Some(call_number) {
            self.calls.push(WriteCall {
                requested_frames: frames,
                outcome: WriteOutcome::Failed,
            });
            return Err(SinkError::Device("injected write failure".into()));
        }
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            self.calls.push(WriteCall {
                requested_frames: frames,
                outcome: WriteOutcome::Busy,
            });
            return Err(SinkError::WouldBlock);
        }
        if data.len() < frames * frame_bytes {
            return Err(SinkError::InvalidState(format!(
                "{} frames need {} bytes, got {}",
                frames,
                frames * frame_bytes,
                data.len()
            )));
        }

        let accepted = self
            .options
            .max_frames_per_write
            .map_or(frames, |max| frames.min(max));
        if self.options.capture {
            self.captured
                .extend_from_slice(&data[..accepted * frame_bytes]);
        }
        self.frames_accepted += accepted as u64;
        if self.frames_accepted >= self.sw.start_threshold as u64 {
            self.started = true;
        }
        self.calls.push(WriteCall {
            requested_frames: frames,
            outcome: WriteOutcome::Written(accepted),
        });
        trace!("memory sink accepted {}/{} frames", accepted, frames);
        Ok(accepted)
    }

    fn drain(&mut self) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::InvalidState("device closed".into()));
        }
        if self.frames_accepted > 0 {
            self.started = true;
        }
        self.drained = true;
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(options: MemorySinkOptions) -> MemorySink {
        let mut sink = MemorySink::new(options);
        sink.hw_params_any().unwrap();
        sink.set_access(AccessMode::RwInterleaved).unwrap();
        sink.set_format(SampleFormat::S16Le).unwrap();
        sink.set_channels(2).unwrap();
        sink.set_rate_near(44100).unwrap();
        sink.set_buffer_time_near(20_000).unwrap();
        sink.set_period_time_near(2_000).unwrap();
        sink.commit_hw_params().unwrap();
        sink
    }

    #[test]
    fn test_rate_near_picks_closest() {
        let mut sink = MemorySink::new(MemorySinkOptions {
            rates: vec![32000, 48000],
            ..Default::default()
        });
        assert_eq!(sink.set_rate_near(44100).unwrap(), 48000);
        assert_eq!(sink.set_rate_near(22050).unwrap(), 32000);
    }

    #[test]
    fn test_timing_requires_rate() {
        let mut sink = MemorySink::new(MemorySinkOptions::default());
        assert!(matches!(
            sink.set_buffer_time_near(20_000),
            Err(SinkError::InvalidState(_))
        ));
    }

    #[test]
    fn test_write_caps_and_records() {
        let mut sink = negotiated(MemorySinkOptions {
            max_frames_per_write: Some(10),
            ..Default::default()
        });
        let data = vec![1u8; 25 * 4];
        assert_eq!(sink.write_interleaved(&data, 25).unwrap(), 10);
        assert_eq!(sink.captured().len(), 40);
        assert_eq!(
            sink.write_calls(),
            &[WriteCall {
                requested_frames: 25,
                outcome: WriteOutcome::Written(10)
            }]
        );
    }

    #[test]
    fn test_busy_then_fail() {
        let mut sink = negotiated(MemorySinkOptions {
            busy_writes: 1,
            fail_on_write: Some(3),
            ..Default::default()
        });
        let data = vec![0u8; 8];
        assert_eq!(sink.write_interleaved(&data, 2), Err(SinkError::WouldBlock));
        assert_eq!(sink.write_interleaved(&data, 2), Ok(2));
        assert!(matches!(
            sink.write_interleaved(&data, 2),
            Err(SinkError::Device(_))
        ));
    }

    #[test]
    fn test_write_before_commit_rejected() {
        let mut sink = MemorySink::new(MemorySinkOptions::default());
        assert!(matches!(
            sink.write_interleaved(&[0u8; 4], 1),
            Err(SinkError::InvalidState(_))
        ));
    }
}
