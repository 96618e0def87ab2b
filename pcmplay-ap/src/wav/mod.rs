//! WAV container support
//!
//! Only the canonical 44-byte header is understood; see [`header`].

pub mod header;

pub use header::{ChunkTag, WavHeader, HEADER_LEN};
