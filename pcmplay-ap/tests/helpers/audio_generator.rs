//! WAV fixture generation
//!
//! Well-formed files are written with hound so the parser is tested against
//! an independent encoder. Malformed or truncated files are assembled by hand
//! from a [`WavHeader`] and raw payload bytes.

use hound::{WavSpec, WavWriter};
use pcmplay_ap::wav::WavHeader;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write `frames` frames of 16-bit silence
pub fn generate_silent_wav<P: AsRef<Path>>(
    path: P,
    channels: u16,
    sample_rate: u32,
    frames: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for _ in 0..frames * u64::from(channels) {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write `frames` stereo 16-bit frames whose samples count up from 0, so
/// lost or duplicated frames show in the captured output
pub fn generate_ramp_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    frames: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for i in 0..frames * 2 {
        writer.write_sample(i as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Payload bytes [`generate_ramp_wav`] writes for `frames` frames
pub fn ramp_payload(frames: u64) -> Vec<u8> {
    (0..frames * 2).flat_map(|i| (i as i16).to_le_bytes()).collect()
}

/// Write `header` followed by `payload` verbatim
pub fn write_raw_wav<P: AsRef<Path>>(
    path: P,
    header: &WavHeader,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    std::fs::write(path, bytes)
}

/// Temporary directory holding generated fixtures
pub struct WavFixtures {
    dir: TempDir,
}

impl WavFixtures {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Silent stereo 16-bit file at 44.1 kHz
    pub fn silent(&self, name: &str, frames: u64) -> PathBuf {
        let path = self.path(name);
        generate_silent_wav(&path, 2, 44_100, frames).expect("Failed to write silent WAV");
        path
    }

    /// Ramp file at 44.1 kHz
    pub fn ramp(&self, name: &str, frames: u64) -> PathBuf {
        let path = self.path(name);
        generate_ramp_wav(&path, 44_100, frames).expect("Failed to write ramp WAV");
        path
    }

    /// Hand-built file
    pub fn raw(&self, name: &str, header: &WavHeader, payload: &[u8]) -> PathBuf {
        let path = self.path(name);
        write_raw_wav(&path, header, payload).expect("Failed to write raw WAV");
        path
    }
}
