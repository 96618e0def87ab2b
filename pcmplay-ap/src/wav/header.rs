//! Canonical 44-byte WAV header
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  file_size
//!      8     4  "WAVE"
//!     12     4  "fmt " (or "fmt\0")
//!     16     4  fmt_chunk_size
//!     20     2  audio_format (1 = PCM)
//!     22     2  channel_count
//!     24     4  sample_rate
//!     28     4  byte_rate
//!     32     2  block_align
//!     34     2  bits_per_sample
//!     36     4  "data"
//!     40     4  data_size
//! ```
//!
//! The payload starts at byte 44. Extension chunks are not skipped: a file
//! whose fourth tag is not "data" is rejected.

use crate::error::{Error, Result};
use std::fmt;
use std::io::{ErrorKind, Read};

/// Size of the canonical header in bytes
pub const HEADER_LEN: usize = 44;

/// Alternative spelling of the fmt tag written by some encoders
const FMT_TAG_NUL: [u8; 4] = *b"fmt\0";

/// The four fixed tags of the canonical header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTag {
    Riff,
    Wave,
    Fmt,
    Data,
}

impl ChunkTag {
    /// All tags in header order
    pub const ALL: [ChunkTag; 4] = [ChunkTag::Riff, ChunkTag::Wave, ChunkTag::Fmt, ChunkTag::Data];

    /// Byte offset of the tag in the header
    pub fn offset(&self) -> usize {
        match self {
            ChunkTag::Riff => 0,
            ChunkTag::Wave => 8,
            ChunkTag::Fmt => 12,
            ChunkTag::Data => 36,
        }
    }

    /// Expected tag bytes
    pub fn expected(&self) -> [u8; 4] {
        match self {
            ChunkTag::Riff => *b"RIFF",
            ChunkTag::Wave => *b"WAVE",
            ChunkTag::Fmt => *b"fmt ",
            ChunkTag::Data => *b"data",
        }
    }

    /// Exact 4-byte comparison against the expected tag
    pub fn matches(&self, found: &[u8; 4]) -> bool {
        *found == self.expected() || (*self == ChunkTag::Fmt && *found == FMT_TAG_NUL)
    }
}

impl fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkTag::Riff => "RIFF",
            ChunkTag::Wave => "WAVE",
            ChunkTag::Fmt => "fmt",
            ChunkTag::Data => "data",
        };
        f.write_str(name)
    }
}

/// Little-endian integer spanning `bytes`, summed byte by byte
fn le_field(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
}

fn le_u16(header: &[u8], offset: usize) -> u16 {
    le_field(&header[offset..offset + 2]) as u16
}

fn le_u32(header: &[u8], offset: usize) -> u32 {
    le_field(&header[offset..offset + 4])
}

fn tag_at(header: &[u8], offset: usize) -> [u8; 4] {
    [
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ]
}

/// Decoded canonical WAV header.
///
/// `byte_rate` and `block_align` hold the values declared in the file; use
/// [`WavHeader::computed_byte_rate`] and [`WavHeader::computed_block_align`]
/// for the values implied by channels/bits/rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_tag: [u8; 4],
    pub file_size: u32,
    pub format_tag: [u8; 4],
    pub fmt_chunk_id: [u8; 4],
    pub fmt_chunk_size: u32,
    pub audio_format: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_chunk_id: [u8; 4],
    pub data_size: u32,
}

impl WavHeader {
    /// WAV `audio_format` code for integer PCM
    pub const FORMAT_PCM: u16 = 1;

    /// Parse the fixed header prefix of `bytes`.
    ///
    /// Only the first 44 bytes are looked at. Each tag is checked on its own,
    /// so a single wrong tag is always reported.
    ///
    /// # Errors
    /// - [`Error::TruncatedHeader`] if fewer than 44 bytes are given
    /// - [`Error::MalformedContainer`] naming the first tag that does not match
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader {
                available: bytes.len(),
            });
        }
        let header = &bytes[..HEADER_LEN];

        for tag in ChunkTag::ALL {
            let found = tag_at(header, tag.offset());
            if !tag.matches(&found) {
                return Err(Error::MalformedContainer {
                    which_tag: tag,
                    found,
                });
            }
        }

        Ok(Self {
            riff_tag: tag_at(header, 0),
            file_size: le_u32(header, 4),
            format_tag: tag_at(header, 8),
            fmt_chunk_id: tag_at(header, 12),
            fmt_chunk_size: le_u32(header, 16),
            audio_format: le_u16(header, 20),
            channel_count: le_u16(header, 22),
            sample_rate: le_u32(header, 24),
            byte_rate: le_u32(header, 28),
            block_align: le_u16(header, 32),
            bits_per_sample: le_u16(header, 34),
            data_chunk_id: tag_at(header, 36),
            data_size: le_u32(header, 40),
        })
    }

    /// Read and parse the header from the start of `reader`.
    ///
    /// Consumes exactly the header bytes, leaving `reader` at the first
    /// payload byte. A read failure is reported as [`Error::HeaderRead`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_LEN];
        let mut got = 0;
        while got < HEADER_LEN {
            match reader.read(&mut bytes[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(Error::HeaderRead { source }),
            }
        }
        Self::parse(&bytes[..got])
    }

    /// Encode back into the 44-byte layout
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.riff_tag);
        out[4..8].copy_from_slice(&self.file_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.format_tag);
        out[12..16].copy_from_slice(&self.fmt_chunk_id);
        out[16..20].copy_from_slice(&self.fmt_chunk_size.to_le_bytes());
        out[20..22].copy_from_slice(&self.audio_format.to_le_bytes());
        out[22..24].copy_from_slice(&self.channel_count.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(&self.data_chunk_id);
        out[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }

    /// Canonical PCM header with consistent derived fields
    pub fn pcm(channel_count: u16, sample_rate: u32, bits_per_sample: u16, data_size: u32) -> Self {
        let block_align = u32::from(channel_count) * u32::from(bits_per_sample).div_ceil(8);
        Self {
            riff_tag: ChunkTag::Riff.expected(),
            file_size: data_size.saturating_add((HEADER_LEN - 8) as u32),
            format_tag: ChunkTag::Wave.expected(),
            fmt_chunk_id: ChunkTag::Fmt.expected(),
            fmt_chunk_size: 16,
            audio_format: Self::FORMAT_PCM,
            channel_count,
            sample_rate,
            byte_rate: sample_rate.saturating_mul(block_align),
            block_align: block_align as u16,
            bits_per_sample,
            data_chunk_id: ChunkTag::Data.expected(),
            data_size,
        }
    }

    /// Bytes per sample, rounding partial bytes up
    pub fn bytes_per_sample(&self) -> u32 {
        u32::from(self.bits_per_sample).div_ceil(8)
    }

    /// `channels × bytes_per_sample`
    pub fn computed_block_align(&self) -> u32 {
        u32::from(self.channel_count) * self.bytes_per_sample()
    }

    /// `sample_rate × channels × bytes_per_sample`
    pub fn computed_byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.computed_block_align())
    }

    /// Whether the declared byte_rate and block_align agree with the format
    pub fn derived_fields_consistent(&self) -> bool {
        u64::from(self.byte_rate) == self.computed_byte_rate()
            && u32::from(self.block_align) == self.computed_block_align()
    }

    /// Bits per sample implied by the declared byte_rate
    pub fn bits_from_byte_rate(&self) -> Option<u32> {
        let denom = self.sample_rate.checked_mul(u32::from(self.channel_count))?;
        (denom != 0).then(|| (8 * u64::from(self.byte_rate) / u64::from(denom)) as u32)
    }

    /// Bits per sample implied by the declared block_align
    pub fn bits_from_block_align(&self) -> Option<u32> {
        (self.channel_count != 0)
            .then(|| 8 * u32::from(self.block_align) / u32::from(self.channel_count))
    }

    /// Whole frames the header says the payload holds
    pub fn payload_frames(&self) -> u64 {
        match self.computed_block_align() {
            0 => 0,
            align => u64::from(self.data_size) / u64::from(align),
        }
    }

    /// Playback duration the header implies, in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.payload_frames() as f64 / f64::from(self.sample_rate)
    }

    /// Check that the header describes integer PCM this player can stream.
    ///
    /// # Errors
    /// [`Error::UnsupportedFormat`] naming the offending field.
    pub fn validate_pcm(&self) -> Result<()> {
        if self.audio_format != Self::FORMAT_PCM {
            return Err(Error::UnsupportedFormat {
                field: "audio_format",
                value: u32::from(self.audio_format),
            });
        }
        if self.channel_count == 0 {
            return Err(Error::UnsupportedFormat {
                field: "channel_count",
                value: 0,
            });
        }
        if self.sample_rate == 0 {
            return Err(Error::UnsupportedFormat {
                field: "sample_rate",
                value: 0,
            });
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(Error::UnsupportedFormat {
                field: "bits_per_sample",
                value: u32::from(self.bits_per_sample),
            });
        }
        Ok(())
    }
}
