//! Error types for pcmplay-ap
//!
//! Every error names the session stage it came from (header parse, hardware
//! negotiation, software negotiation, streaming) and the field or condition
//! that failed. Only the device's "try again" signal is ever retried, and that
//! happens inside the streaming writer; everything that reaches the caller as
//! an [`Error`] has ended the session.

use crate::device::SinkError;
use crate::wav::ChunkTag;
use std::fmt;
use thiserror::Error;

/// Session stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Opening files, reading configuration
    Setup,
    HeaderParse,
    HardwareNegotiation,
    SoftwareNegotiation,
    Streaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::HeaderParse => "header parse",
            Stage::HardwareNegotiation => "hardware negotiation",
            Stage::SoftwareNegotiation => "software negotiation",
            Stage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Individual query/set step of parameter negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    Capabilities,
    Resample,
    Access,
    Format,
    Channels,
    Rate,
    BufferTime,
    BufferSize,
    PeriodTime,
    PeriodSize,
    CommitHardware,
    SoftwareCurrent,
    StartThreshold,
    AvailMin,
    CommitSoftware,
}

impl NegotiationStage {
    /// Whether this step belongs to software parameter negotiation
    pub fn is_software(&self) -> bool {
        matches!(
            self,
            NegotiationStage::SoftwareCurrent
                | NegotiationStage::StartThreshold
                | NegotiationStage::AvailMin
                | NegotiationStage::CommitSoftware
        )
    }
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStage::Capabilities => "capability query",
            NegotiationStage::Resample => "resampling",
            NegotiationStage::Access => "access mode",
            NegotiationStage::Format => "sample format",
            NegotiationStage::Channels => "channel count",
            NegotiationStage::Rate => "rate",
            NegotiationStage::BufferTime => "buffer time",
            NegotiationStage::BufferSize => "buffer size",
            NegotiationStage::PeriodTime => "period time",
            NegotiationStage::PeriodSize => "period size",
            NegotiationStage::CommitHardware => "hardware commit",
            NegotiationStage::SoftwareCurrent => "current software parameters",
            NegotiationStage::StartThreshold => "start threshold",
            NegotiationStage::AvailMin => "avail_min",
            NegotiationStage::CommitSoftware => "software commit",
        };
        f.write_str(name)
    }
}

/// Main error type for pcmplay-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer than 44 header bytes were available
    #[error("header parse: truncated header ({available} of 44 bytes available)")]
    TruncatedHeader { available: usize },

    /// One of the four fixed tags does not match at its offset
    #[error(
        "header parse: malformed container, expected {} tag, found \"{}\"",
        .which_tag,
        .found.escape_ascii()
    )]
    MalformedContainer { which_tag: ChunkTag, found: [u8; 4] },

    /// Reading the header bytes failed
    #[error("header parse: read failed: {source}")]
    HeaderRead {
        #[source]
        source: std::io::Error,
    },

    /// Header describes audio this player cannot stream
    #[error("header parse: unsupported format, {field} = {value}")]
    UnsupportedFormat { field: &'static str, value: u32 },

    /// Device refused a requested parameter outright
    #[error("{}: {} rejected by device: {}", negotiation_phase(.stage), .stage, .source)]
    NegotiationRejected {
        stage: NegotiationStage,
        #[source]
        source: SinkError,
    },

    /// Device offered a different rate than requested
    #[error("hardware negotiation: rate mismatch (requested {requested} Hz, device offers {actual} Hz)")]
    RateMismatch { requested: u32, actual: u32 },

    /// Device reported a non-retryable write error
    #[error("streaming: write failed: {source}")]
    WriteFailed {
        #[source]
        source: SinkError,
    },

    /// Reading the payload failed mid-stream
    #[error("streaming: read failed at offset {offset}: {source}")]
    ReadFailed {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// Device stayed busy for more consecutive attempts than allowed
    #[error("streaming: device busy for {attempts} consecutive write attempts")]
    BusyRetriesExhausted { attempts: u32 },

    /// File open/read failure
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid player configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the shared configuration layer
    #[error(transparent)]
    Common(#[from] pcmplay_common::Error),
}

fn negotiation_phase(stage: &NegotiationStage) -> Stage {
    if stage.is_software() {
        Stage::SoftwareNegotiation
    } else {
        Stage::HardwareNegotiation
    }
}

impl Error {
    /// Session stage this error ended
    pub fn stage(&self) -> Stage {
        match self {
            Error::TruncatedHeader { .. }
            | Error::MalformedContainer { .. }
            | Error::HeaderRead { .. }
            | Error::UnsupportedFormat { .. } => Stage::HeaderParse,
            Error::NegotiationRejected { stage, .. } => negotiation_phase(stage),
            Error::RateMismatch { .. } => Stage::HardwareNegotiation,
            Error::WriteFailed { .. }
            | Error::ReadFailed { .. }
            | Error::BusyRetriesExhausted { .. } => Stage::Streaming,
            Error::Io(_) | Error::Config(_) | Error::Common(_) => Stage::Setup,
        }
    }
}

/// Convenience Result type using pcmplay-ap Error
pub type Result<T> = std::result::Result<T, Error>;
