//! Playback session: parameter negotiation, the streaming loop and the
//! orchestrator tying them to a WAV file

pub mod cancel;
pub mod negotiate;
pub mod session;
pub mod writer;

pub use cancel::CancelToken;
pub use negotiate::{negotiate_hardware, negotiate_software, start_threshold};
pub use session::{PlaybackReport, Player, ProbeReport};
pub use writer::{RetryPolicy, StreamEnd, StreamStats, StreamingWriter, WriterState};
