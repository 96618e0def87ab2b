//! In-memory sinks for integration tests

use pcmplay_ap::device::{MemorySink, MemorySinkOptions};

/// Sink with default capabilities and the given fault injection
pub fn memory_sink(options: MemorySinkOptions) -> MemorySink {
    MemorySink::new(options)
}

/// Sink that insists on `period` frames per period and a buffer of ten periods
pub fn period_sink(period: usize, options: MemorySinkOptions) -> MemorySink {
    MemorySink::new(MemorySinkOptions {
        forced_period_frames: Some(period),
        forced_buffer_frames: Some(period * 10),
        ..options
    })
}
