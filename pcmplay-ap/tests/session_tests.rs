//! End-to-end playback sessions from WAV files into the in-memory sink

mod helpers;

use helpers::{memory_sink, ramp_payload, WavFixtures};
use pcmplay_ap::audio::{AvailMinMode, SampleFormat};
use pcmplay_ap::device::{MemorySinkOptions, WriteCall, WriteOutcome};
use pcmplay_ap::error::{NegotiationStage, Stage};
use pcmplay_ap::playback::{StreamEnd, WriterState};
use pcmplay_ap::wav::{ChunkTag, WavHeader};
use pcmplay_ap::{CancelToken, Error, Player, PlayerConfig, RequestSource};
use std::io::Read;

#[test]
fn test_two_periods_of_silence() {
    let fixtures = WavFixtures::new();
    let path = fixtures.silent("two_periods.wav", 2 * 88);
    let mut sink = memory_sink(MemorySinkOptions::default());
    let player = Player::new(PlayerConfig::default());

    let report = player
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.hardware.actual_period_frames, 88);
    assert_eq!(report.buffer_bytes, 88 * 2 * 2);
    assert_eq!(
        sink.write_calls(),
        &[
            WriteCall {
                requested_frames: 88,
                outcome: WriteOutcome::Written(88)
            },
            WriteCall {
                requested_frames: 88,
                outcome: WriteOutcome::Written(88)
            },
        ]
    );
    assert!(sink.captured().iter().all(|&b| b == 0));
    assert_eq!(report.end, StreamEnd::EndOfStream);
    assert_eq!(report.final_state, WriterState::Closed);
    assert!(sink.is_drained());
    assert!(sink.is_closed());
}

#[test]
fn test_payload_reaches_device_unchanged() {
    let fixtures = WavFixtures::new();
    let path = fixtures.ramp("ramp.wav", 1000);
    let mut sink = memory_sink(MemorySinkOptions {
        busy_writes: 2,
        max_frames_per_write: Some(50),
        ..Default::default()
    });
    let player = Player::new(PlayerConfig::default());

    let report = player
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();

    assert_eq!(sink.captured(), &ramp_payload(1000)[..]);
    assert_eq!(report.stats.frames_written, 1000);
    assert_eq!(report.stats.busy_retries, 2);
    assert!(report.stats.partial_writes > 0);
    assert!(sink.started());
}

#[test]
fn test_data_size_limit() {
    let fixtures = WavFixtures::new();
    // Header claims 100 frames, file carries 150
    let header = WavHeader::pcm(2, 44_100, 16, 400);
    let path = fixtures.raw("trailing.wav", &header, &ramp_payload(150));

    let mut sink = memory_sink(MemorySinkOptions::default());
    Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();
    assert_eq!(sink.frames_accepted(), 100);

    let config = PlayerConfig {
        stop_at_data_size: false,
        ..Default::default()
    };
    let mut sink = memory_sink(MemorySinkOptions::default());
    Player::new(config)
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();
    assert_eq!(sink.frames_accepted(), 150);
}

#[test]
fn test_truncated_payload_plays_what_exists() {
    let fixtures = WavFixtures::new();
    let header = WavHeader::pcm(2, 44_100, 16, 40_000);
    let path = fixtures.raw("cut.wav", &header, &ramp_payload(90));

    let mut sink = memory_sink(MemorySinkOptions::default());
    let report = Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();
    assert_eq!(report.end, StreamEnd::EndOfStream);
    assert_eq!(sink.written_frames(), vec![88, 2]);
}

#[test]
fn test_duration_budget() {
    let fixtures = WavFixtures::new();
    let path = fixtures.silent("long.wav", 44_100);
    let config = PlayerConfig {
        duration_secs: Some(0.01),
        ..Default::default()
    };
    let mut sink = memory_sink(MemorySinkOptions::default());

    let report = Player::new(config)
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();
    assert_eq!(report.end, StreamEnd::BudgetReached);
    assert_eq!(sink.frames_accepted(), 441);
    assert_eq!(sink.written_frames().last(), Some(&1));
    assert_eq!(report.final_state, WriterState::Closed);
    assert!(sink.is_drained());
    assert!(sink.started());
}

#[test]
fn test_duration_below_start_threshold_still_plays() {
    let fixtures = WavFixtures::new();
    let path = fixtures.silent("short.wav", 44_100);
    let config = PlayerConfig {
        duration_secs: Some(0.001),
        ..Default::default()
    };
    let mut sink = memory_sink(MemorySinkOptions::default());

    let report = Player::new(config)
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();
    assert!(report.software.start_threshold_frames as u64 > sink.frames_accepted());
    assert!(sink.started());
    assert!(sink.is_drained());
}

/// Serves `good` bytes, then fails every read
struct FailingReader {
    bytes: Vec<u8>,
    pos: usize,
    good: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.good {
            return Err(std::io::Error::other("disk gone"));
        }
        let n = buf.len().min(self.good - self.pos);
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[test]
fn test_read_failure_mid_payload_is_streaming_error() {
    let header = WavHeader::pcm(2, 44_100, 16, 4 * 1000);
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend(ramp_payload(1000));
    let reader = FailingReader {
        bytes,
        pos: 0,
        good: 44 + 362,
    };
    let mut sink = memory_sink(MemorySinkOptions::default());

    let err = Player::new(PlayerConfig::default())
        .play_reader(reader, &mut sink, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::ReadFailed { offset: 406, .. }));
    assert_eq!(err.stage(), Stage::Streaming);
    assert!(err.to_string().starts_with("streaming: read failed"));
    assert_eq!(sink.frames_accepted(), 88);
    assert!(sink.is_closed());
}

#[test]
fn test_read_failure_in_header_is_header_error() {
    let reader = FailingReader {
        bytes: WavHeader::pcm(2, 44_100, 16, 0).to_bytes().to_vec(),
        pos: 0,
        good: 10,
    };
    let mut sink = memory_sink(MemorySinkOptions::default());

    let err = Player::new(PlayerConfig::default())
        .play_reader(reader, &mut sink, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::HeaderRead { .. }));
    assert_eq!(err.stage(), Stage::HeaderParse);
    assert!(sink.is_closed());
}

#[test]
fn test_cancelled_session_releases_device() {
    let fixtures = WavFixtures::new();
    let path = fixtures.silent("cancel.wav", 10_000);
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut sink = memory_sink(MemorySinkOptions::default());

    let report = Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &cancel)
        .unwrap();
    assert_eq!(report.end, StreamEnd::Cancelled);
    assert_eq!(report.stats.frames_written, 0);
    assert!(sink.is_closed());
}

#[test]
fn test_failures_name_their_stage() {
    let fixtures = WavFixtures::new();
    let good = WavHeader::pcm(2, 44_100, 16, 352);

    // Missing file
    let mut sink = memory_sink(MemorySinkOptions::default());
    let err = Player::new(PlayerConfig::default())
        .play_file(&fixtures.path("missing.wav"), &mut sink, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.stage(), Stage::Setup);
    assert!(sink.is_closed());

    // Bad container
    let mut bad = good.clone();
    bad.format_tag = *b"AVI ";
    let path = fixtures.raw("avi.wav", &bad, &[0; 352]);
    let mut sink = memory_sink(MemorySinkOptions::default());
    let err = Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::MalformedContainer { which_tag: ChunkTag::Wave, .. }));
    assert!(err.to_string().starts_with("header parse"));

    // Non-PCM
    let mut float = good.clone();
    float.audio_format = 3;
    let path = fixtures.raw("float.wav", &float, &[0; 352]);
    let mut sink = memory_sink(MemorySinkOptions::default());
    let err = Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { field: "audio_format", value: 3 }));

    // Device cannot do the file's rate
    let path = fixtures.raw("rate.wav", &good, &[0; 352]);
    let mut sink = memory_sink(MemorySinkOptions {
        rates: vec![48_000],
        ..Default::default()
    });
    let err = Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.stage(), Stage::HardwareNegotiation);
    assert!(sink.write_calls().is_empty());
    assert!(sink.is_closed());

    // Device dies while streaming
    let mut sink = memory_sink(MemorySinkOptions {
        fail_on_write: Some(1),
        ..Default::default()
    });
    let err = Player::new(PlayerConfig::default())
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Streaming);
    assert!(sink.is_closed());
}

#[test]
fn test_fixed_request_source() {
    let fixtures = WavFixtures::new();
    // 8-bit mono file played as fixed 16-bit stereo
    let header = WavHeader::pcm(1, 8_000, 8, 64);
    let path = fixtures.raw("mono8.wav", &header, &[0x80; 64]);
    let config = PlayerConfig {
        request_source: RequestSource::Fixed {
            sample_format: SampleFormat::S16Le,
            channel_count: 2,
            rate: 44_100,
        },
        avail_min: AvailMinMode::Buffer,
        ..Default::default()
    };
    let mut sink = memory_sink(MemorySinkOptions::default());

    let report = Player::new(config)
        .play_file(&path, &mut sink, &CancelToken::new())
        .unwrap();
    assert_eq!(report.hardware.frame_bytes(), 4);
    assert_eq!(report.software.avail_min_frames, report.hardware.actual_buffer_frames);
    assert_eq!(sink.frames_accepted(), 16);
}

#[test]
fn test_probe_with_header() {
    let mut sink = memory_sink(MemorySinkOptions::default());
    let header = WavHeader::pcm(1, 48_000, 32, 0);
    let report = Player::new(PlayerConfig::default())
        .probe(Some(&header), &mut sink)
        .unwrap();

    assert_eq!(report.hardware.actual_rate, 48_000);
    assert_eq!(report.hardware.physical_width(), 32);
    assert_eq!(report.hardware.actual_period_frames, 96);
    assert_eq!(report.hardware.actual_buffer_frames, 960);
    assert!(sink.is_closed());

    let mut sink = memory_sink(MemorySinkOptions {
        reject_stage: Some(NegotiationStage::CommitHardware),
        ..Default::default()
    });
    let err = Player::new(PlayerConfig::default())
        .probe(Some(&header), &mut sink)
        .unwrap_err();
    assert_eq!(err.stage(), Stage::HardwareNegotiation);
}
