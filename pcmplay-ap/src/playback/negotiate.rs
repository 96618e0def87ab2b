//! Hardware and software parameter negotiation
//!
//! Hardware negotiation fixes access, format, channels and rate before asking
//! for buffer and period timing, since the device sizes those in frames.
//! Each step is attempted once; a refusal ends negotiation with the step
//! named in the error.

use crate::audio::{AvailMinMode, HardwareRequest, HardwareStreamConfig, SoftwareStreamConfig};
use crate::device::{PcmSink, SinkError, SinkResult};
use crate::error::{Error, NegotiationStage, Result};
use tracing::{debug, info};

/// Tag a sink failure with the negotiation step it happened in
trait AtStage<T> {
    fn at(self, stage: NegotiationStage) -> Result<T>;
}

impl<T> AtStage<T> for SinkResult<T> {
    fn at(self, stage: NegotiationStage) -> Result<T> {
        self.map_err(|source| Error::NegotiationRejected { stage, source })
    }
}

/// Largest multiple of `period` not exceeding `buffer`
pub fn start_threshold(buffer_frames: usize, period_frames: usize) -> usize {
    if period_frames == 0 {
        return buffer_frames;
    }
    (buffer_frames / period_frames) * period_frames
}

/// Negotiate hardware parameters and commit them to `sink`.
///
/// # Errors
/// - [`Error::NegotiationRejected`] naming the step the sink refused
/// - [`Error::RateMismatch`] if the sink offers any rate but the requested one
pub fn negotiate_hardware<S: PcmSink + ?Sized>(
    sink: &mut S,
    request: &HardwareRequest,
) -> Result<HardwareStreamConfig> {
    let caps = sink.hw_params_any().at(NegotiationStage::Capabilities)?;
    debug!(
        "Device capabilities: formats={:?}, channels={:?}, rates={:?}",
        caps.formats, caps.channels, caps.rates
    );

    sink.set_rate_resample(request.resample)
        .at(NegotiationStage::Resample)?;
    sink.set_access(request.access_mode)
        .at(NegotiationStage::Access)?;
    sink.set_format(request.sample_format)
        .at(NegotiationStage::Format)?;
    sink.set_channels(request.channel_count)
        .at(NegotiationStage::Channels)?;

    let actual_rate = sink.set_rate_near(request.rate).at(NegotiationStage::Rate)?;
    if actual_rate != request.rate {
        return Err(Error::RateMismatch {
            requested: request.rate,
            actual: actual_rate,
        });
    }

    let actual_buffer_time_us = sink
        .set_buffer_time_near(request.buffer_time_us)
        .at(NegotiationStage::BufferTime)?;
    let actual_buffer_frames = sink.buffer_size().at(NegotiationStage::BufferSize)?;
    if actual_buffer_frames == 0 {
        return Err(Error::NegotiationRejected {
            stage: NegotiationStage::BufferSize,
            source: SinkError::Unsupported("device reported a zero-frame buffer".into()),
        });
    }

    let actual_period_time_us = sink
        .set_period_time_near(request.period_time_us)
        .at(NegotiationStage::PeriodTime)?;
    let actual_period_frames = sink.period_size().at(NegotiationStage::PeriodSize)?;
    if actual_period_frames == 0 {
        return Err(Error::NegotiationRejected {
            stage: NegotiationStage::PeriodSize,
            source: SinkError::Unsupported("device reported a zero-frame period".into()),
        });
    }

    sink.commit_hw_params().at(NegotiationStage::CommitHardware)?;

    let hw = HardwareStreamConfig {
        access_mode: request.access_mode,
        sample_format: request.sample_format,
        channel_count: request.channel_count,
        requested_rate: request.rate,
        actual_rate,
        buffer_time_us: request.buffer_time_us,
        actual_buffer_time_us,
        actual_buffer_frames,
        period_time_us: request.period_time_us,
        actual_period_time_us,
        actual_period_frames,
    };
    info!(
        "Hardware configured: {} {} x{} @ {} Hz, buffer {} frames ({} us), period {} frames ({} us)",
        hw.access_mode,
        hw.sample_format,
        hw.channel_count,
        hw.actual_rate,
        hw.actual_buffer_frames,
        hw.actual_buffer_time_us,
        hw.actual_period_frames,
        hw.actual_period_time_us
    );
    Ok(hw)
}

/// Negotiate software parameters for an already committed hardware config.
///
/// # Errors
/// [`Error::NegotiationRejected`] naming the step the sink refused.
pub fn negotiate_software<S: PcmSink + ?Sized>(
    sink: &mut S,
    hw: &HardwareStreamConfig,
    avail_min: AvailMinMode,
) -> Result<SoftwareStreamConfig> {
    let current = sink
        .sw_params_current()
        .at(NegotiationStage::SoftwareCurrent)?;
    debug!(
        "Current software params: start_threshold={}, avail_min={}",
        current.start_threshold, current.avail_min
    );

    let threshold = start_threshold(hw.actual_buffer_frames, hw.actual_period_frames);
    sink.set_start_threshold(threshold)
        .at(NegotiationStage::StartThreshold)?;

    let avail_min_frames = match avail_min {
        AvailMinMode::Period => hw.actual_period_frames,
        AvailMinMode::Buffer => hw.actual_buffer_frames,
    };
    sink.set_avail_min(avail_min_frames)
        .at(NegotiationStage::AvailMin)?;

    sink.commit_sw_params().at(NegotiationStage::CommitSoftware)?;

    let sw = SoftwareStreamConfig {
        start_threshold_frames: threshold,
        avail_min_frames,
    };
    info!(
        "Software configured: start_threshold {} frames, avail_min {} frames ({})",
        sw.start_threshold_frames, sw.avail_min_frames, avail_min
    );
    Ok(sw)
}
