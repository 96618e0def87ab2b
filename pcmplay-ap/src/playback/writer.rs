//! Streaming write loop
//!
//! Pulls one period of frames at a time from a [`SampleSource`] and pushes it
//! to the sink until the source runs dry. The sink's blocking write paces the
//! loop.
//!
//! ```text
//! Idle ──first fetch──▶ Streaming ──short block──▶ Draining ──▶ Closed
//!                           │
//!                           └──write error──▶ Faulted
//! ```
//!
//! Within one block:
//! - "try again" repeats the same write (bounded by [`RetryPolicy`])
//! - a partial write advances by the frames the sink reports and writes the rest
//! - any other error faults the session

use crate::audio::{HardwareStreamConfig, SampleBuffer, SampleSource};
use crate::device::PcmSink;
use crate::error::{Error, Result};
use crate::playback::CancelToken;
use std::fmt;
use std::io::Read;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Writer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Streaming,
    Draining,
    Faulted,
    Closed,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterState::Idle => "idle",
            WriterState::Streaming => "streaming",
            WriterState::Draining => "draining",
            WriterState::Faulted => "faulted",
            WriterState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How busy ("try again") writes are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive busy replies tolerated for one write before failing
    pub max_busy_retries: u32,
    /// Pause between attempts; zero yields the thread instead
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_busy_retries: 10_000,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    fn pause(&self) {
        if self.backoff.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.backoff);
        }
    }
}

/// Why a stream ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Source returned a short or empty block
    EndOfStream,
    /// Cancel token tripped before a block fetch
    Cancelled,
    /// Frame budget used up
    BudgetReached,
}

/// Counters for one streaming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Blocks fetched from the source, including the final short one
    pub blocks: u64,
    pub frames_written: u64,
    /// Calls made to the sink's write, busy and partial ones included
    pub write_calls: u64,
    /// Writes that accepted fewer frames than offered
    pub partial_writes: u64,
    pub busy_retries: u64,
    /// Bytes of trailing partial frames that were not written
    pub dropped_bytes: u64,
}

/// Period-at-a-time writer owning the session's sample buffer
pub struct StreamingWriter {
    buffer: SampleBuffer,
    period_frames: usize,
    retry: RetryPolicy,
    frame_budget: Option<u64>,
    state: WriterState,
    stats: StreamStats,
}

impl StreamingWriter {
    pub fn new(hw: &HardwareStreamConfig, retry: RetryPolicy) -> Self {
        Self {
            buffer: SampleBuffer::for_config(hw),
            period_frames: hw.actual_period_frames,
            retry,
            frame_budget: None,
            state: WriterState::Idle,
            stats: StreamStats::default(),
        }
    }

    /// Stop after writing `frames` frames
    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Size of the sample buffer in bytes
    pub fn buffer_bytes(&self) -> usize {
        self.buffer.capacity_bytes()
    }

    /// Stream `source` into `sink` until end of stream, cancellation, the
    /// frame budget, or an error.
    ///
    /// On a clean end of stream the sink is drained. The sink is never
    /// closed here.
    ///
    /// # Errors
    /// - [`Error::WriteFailed`] on a non-retryable sink error
    /// - [`Error::BusyRetriesExhausted`] when the sink stays busy too long
    /// - [`Error::ReadFailed`] when reading the source fails
    pub fn run<R, S>(
        &mut self,
        source: &mut SampleSource<R>,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<StreamEnd>
    where
        R: Read,
        S: PcmSink + ?Sized,
    {
        let end = match self.stream(source, sink, cancel) {
            Ok(end) => end,
            Err(e) => {
                self.state = WriterState::Faulted;
                return Err(e);
            }
        };

        if end != StreamEnd::Cancelled {
            self.state = WriterState::Draining;
            debug!("{:?} after {} frames, draining", end, self.stats.frames_written);
            if let Err(source) = sink.drain() {
                self.state = WriterState::Faulted;
                return Err(Error::WriteFailed { source });
            }
        }
        self.state = WriterState::Closed;
        Ok(end)
    }

    fn stream<R, S>(
        &mut self,
        source: &mut SampleSource<R>,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<StreamEnd>
    where
        R: Read,
        S: PcmSink + ?Sized,
    {
        loop {
            if cancel.is_cancelled() {
                debug!("Playback cancelled after {} frames", self.stats.frames_written);
                return Ok(StreamEnd::Cancelled);
            }

            let wanted = match self.frame_budget {
                Some(budget) => {
                    let left = budget.saturating_sub(self.stats.frames_written);
                    if left == 0 {
                        debug!("Frame budget of {} reached", budget);
                        return Ok(StreamEnd::BudgetReached);
                    }
                    self.period_frames.min(usize::try_from(left).unwrap_or(usize::MAX))
                }
                None => self.period_frames,
            };

            let got = source.next_block(wanted, self.buffer.as_mut_bytes())?.len();
            self.buffer.set_filled(got);
            if self.state == WriterState::Idle {
                self.state = WriterState::Streaming;
            }
            self.stats.blocks += 1;

            let partial = self.buffer.partial_frame_bytes();
            if partial > 0 {
                debug!("Dropping {} bytes of trailing partial frame", partial);
                self.stats.dropped_bytes += partial as u64;
            }

            let frames = self.buffer.frames();
            trace!("Block {}: {} of {} frames", self.stats.blocks, frames, wanted);
            if frames > 0 {
                self.write_block(sink, frames)?;
            }

            if source.is_exhausted() {
                return Ok(StreamEnd::EndOfStream);
            }
        }
    }

    /// Write the first `frames` frames of the buffer, resuming after partial
    /// writes and retrying busy replies
    fn write_block<S: PcmSink + ?Sized>(&mut self, sink: &mut S, frames: usize) -> Result<()> {
        let mut offset = 0;
        let mut busy = 0u32;

        while offset < frames {
            let remaining = frames - offset;
            self.stats.write_calls += 1;

            let written = match sink.write_interleaved(self.buffer.frames_from(offset), remaining) {
                Ok(n) => n.min(remaining),
                Err(e) if e.is_retryable() => 0,
                Err(source) => return Err(Error::WriteFailed { source }),
            };

            if written == 0 {
                busy += 1;
                self.stats.busy_retries += 1;
                if busy > self.retry.max_busy_retries {
                    warn!("Device busy for {} consecutive writes, giving up", busy);
                    return Err(Error::BusyRetriesExhausted { attempts: busy });
                }
                self.retry.pause();
                continue;
            }

            if written < remaining {
                self.stats.partial_writes += 1;
                trace!("Partial write: {} of {} frames", written, remaining);
            }
            busy = 0;
            offset += written;
            self.stats.frames_written += written as u64;
        }
        Ok(())
    }
}
