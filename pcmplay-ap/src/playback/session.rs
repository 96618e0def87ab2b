//! Playback session orchestration
//!
//! parse header → negotiate hardware → negotiate software → size the sample
//! buffer → stream → release the device. The sink is closed on every exit
//! path, including header and negotiation failures.

use crate::audio::{HardwareRequest, HardwareStreamConfig, SampleSource, SoftwareStreamConfig};
use crate::config::{PlayerConfig, RequestSource};
use crate::device::PcmSink;
use crate::error::Result;
use crate::playback::{
    negotiate_hardware, negotiate_software, CancelToken, StreamEnd, StreamStats, StreamingWriter,
    WriterState,
};
use crate::wav::WavHeader;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a completed playback session
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    pub header: WavHeader,
    pub hardware: HardwareStreamConfig,
    pub software: SoftwareStreamConfig,
    /// Bytes in the per-period sample buffer
    pub buffer_bytes: usize,
    pub end: StreamEnd,
    pub stats: StreamStats,
    pub final_state: WriterState,
}

/// Outcome of a negotiate-only session
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub device: String,
    pub request: HardwareRequest,
    pub hardware: HardwareStreamConfig,
    pub software: SoftwareStreamConfig,
}

/// Runs playback sessions with one configuration
#[derive(Debug, Clone)]
pub struct Player {
    config: PlayerConfig,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Play the WAV file at `path` into `sink`, then close the sink.
    pub fn play_file<S: PcmSink + ?Sized>(
        &self,
        path: &Path,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<PlaybackReport> {
        let result = self.open_and_stream(path, sink, cancel);
        release(sink);
        result
    }

    /// Play a WAV stream (header included) from `reader`, then close the sink.
    pub fn play_reader<R: Read, S: PcmSink + ?Sized>(
        &self,
        reader: R,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<PlaybackReport> {
        let result = self.stream(reader, sink, cancel);
        release(sink);
        result
    }

    /// Negotiate hardware and software parameters without streaming, then
    /// close the sink.
    ///
    /// Without a header the request uses the fixed configuration, or
    /// 44100 Hz stereo S16_LE if the configuration is header-driven.
    pub fn probe<S: PcmSink + ?Sized>(
        &self,
        header: Option<&WavHeader>,
        sink: &mut S,
    ) -> Result<ProbeReport> {
        let result = self.negotiate_only(header, sink);
        release(sink);
        result
    }

    fn negotiate_only<S: PcmSink + ?Sized>(
        &self,
        header: Option<&WavHeader>,
        sink: &mut S,
    ) -> Result<ProbeReport> {
        let request = self.request_for(header)?;
        let hardware = negotiate_hardware(sink, &request)?;
        log_hardware(&hardware);
        let software = negotiate_software(sink, &hardware, self.config.avail_min)?;
        Ok(ProbeReport {
            device: sink.name(),
            request,
            hardware,
            software,
        })
    }

    fn open_and_stream<S: PcmSink + ?Sized>(
        &self,
        path: &Path,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<PlaybackReport> {
        let file = File::open(path)?;
        if let Ok(meta) = file.metadata() {
            info!("File {}: {} bytes", path.display(), meta.len());
        }
        self.stream(BufReader::new(file), sink, cancel)
    }

    fn request_for(&self, header: Option<&WavHeader>) -> Result<HardwareRequest> {
        match header {
            Some(header) => self.config.hardware_request(header),
            // Fixed requests ignore the header
            None => self.config.hardware_request(&WavHeader::pcm(2, 44_100, 16, 0)),
        }
    }

    fn stream<R: Read, S: PcmSink + ?Sized>(
        &self,
        mut reader: R,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<PlaybackReport> {
        let header = WavHeader::read_from(&mut reader)?;
        log_header(&header);
        if self.config.request_source == RequestSource::Header {
            header.validate_pcm()?;
        }

        let request = self.config.hardware_request(&header)?;
        info!("Opening device '{}'", sink.name());
        let hardware = negotiate_hardware(sink, &request)?;
        log_hardware(&hardware);
        let software = negotiate_software(sink, &hardware, self.config.avail_min)?;

        let frame_bytes = hardware.frame_bytes();
        if usize::from(header.block_align) != frame_bytes {
            warn!(
                "Header block_align {} differs from device frame size {} bytes",
                header.block_align, frame_bytes
            );
        }

        let mut source = SampleSource::new(reader, frame_bytes);
        if self.config.stop_at_data_size {
            source = source.with_data_limit(u64::from(header.data_size));
        }

        let mut writer = StreamingWriter::new(&hardware, self.config.retry);
        if let Some(secs) = self.config.duration_secs {
            writer = writer.with_frame_budget(hardware.frames_for_secs(secs));
        }
        let buffer_bytes = writer.buffer_bytes();
        info!(
            "Sample buffer: {} frames, {} bytes",
            hardware.actual_period_frames, buffer_bytes
        );

        let end = writer.run(&mut source, sink, cancel)?;
        let stats = writer.stats();
        info!(
            "Playback finished ({:?}): {} frames in {} writes, {} partial, {} busy retries",
            end, stats.frames_written, stats.write_calls, stats.partial_writes, stats.busy_retries
        );

        Ok(PlaybackReport {
            header,
            hardware,
            software,
            buffer_bytes,
            end,
            stats,
            final_state: writer.state(),
        })
    }
}

fn release<S: PcmSink + ?Sized>(sink: &mut S) {
    if let Err(e) = sink.close() {
        warn!("Failed to close device '{}': {}", sink.name(), e);
    }
}

fn log_header(header: &WavHeader) {
    debug!(
        "RIFF: file_size={}, fmt_chunk_size={}, audio_format={}",
        header.file_size, header.fmt_chunk_size, header.audio_format
    );
    info!(
        "WAV: {} ch, {} Hz, {} bits, {} data bytes ({:.2} s)",
        header.channel_count,
        header.sample_rate,
        header.bits_per_sample,
        header.data_size,
        header.duration_secs()
    );
    debug!(
        "byte_rate={} (computed {}), block_align={} (computed {})",
        header.byte_rate,
        header.computed_byte_rate(),
        header.block_align,
        header.computed_block_align()
    );
    if !header.derived_fields_consistent() {
        warn!("Header byte_rate/block_align disagree with channels, rate and bit depth");
    }
}

fn log_hardware(hw: &HardwareStreamConfig) {
    info!(
        "Buffer size: {} frames ({} bytes), period size: {} frames ({} bytes)",
        hw.actual_buffer_frames,
        hw.buffer_bytes(),
        hw.actual_period_frames,
        hw.period_bytes()
    );
    debug!("Physical sample width: {} bits", hw.physical_width());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use crate::device::{MemorySink, MemorySinkOptions};
    use crate::error::{Error, NegotiationStage, Stage};
    use std::io::Cursor;

    fn wav_bytes(header: &WavHeader, payload: &[u8]) -> Vec<u8> {
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_sink_closed_after_header_error() {
        let mut sink = MemorySink::new(MemorySinkOptions::default());
        let player = Player::new(PlayerConfig::default());

        let err = player
            .play_reader(Cursor::new(vec![0u8; 10]), &mut sink, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.stage(), Stage::HeaderParse);
        assert!(sink.is_closed());
        assert!(!sink.hw_committed());
    }

    #[test]
    fn test_sink_closed_after_negotiation_error() {
        let mut sink = MemorySink::new(MemorySinkOptions {
            reject_stage: Some(NegotiationStage::AvailMin),
            ..Default::default()
        });
        let player = Player::new(PlayerConfig::default());
        let header = WavHeader::pcm(2, 44100, 16, 16);

        let err = player
            .play_reader(
                Cursor::new(wav_bytes(&header, &[0; 16])),
                &mut sink,
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NegotiationRejected {
                stage: NegotiationStage::AvailMin,
                ..
            }
        ));
        assert_eq!(err.stage(), Stage::SoftwareNegotiation);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_probe_without_header() {
        let mut sink = MemorySink::new(MemorySinkOptions::default());
        let player = Player::new(PlayerConfig::default());

        let report = player.probe(None, &mut sink).unwrap();
        assert_eq!(report.device, "memory");
        assert_eq!(report.request.rate, 44_100);
        assert_eq!(report.request.channel_count, 2);
        assert_eq!(report.request.sample_format, SampleFormat::S16Le);
        assert_eq!(report.hardware.actual_period_frames, 88);
        assert_eq!(report.software.start_threshold_frames, 880);
        assert!(sink.write_calls().is_empty());
        assert!(sink.is_closed());
    }
}
