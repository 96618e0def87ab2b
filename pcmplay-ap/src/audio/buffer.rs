//! Period-sized sample buffer
//!
//! One buffer per session, owned by the streaming writer and refilled in
//! place for every block. It holds interleaved PCM bytes exactly as they go
//! to the device.

use crate::audio::HardwareStreamConfig;

/// Reusable byte region holding one period of interleaved frames
#[derive(Debug)]
pub struct SampleBuffer {
    data: Vec<u8>,
    frame_bytes: usize,
    /// Bytes of `data` holding the current block
    filled: usize,
}

impl SampleBuffer {
    /// Buffer for `frames` frames of `frame_bytes` bytes each
    pub fn new(frames: usize, frame_bytes: usize) -> Self {
        Self {
            data: vec![0; frames * frame_bytes],
            frame_bytes,
            filled: 0,
        }
    }

    /// Buffer sized `actual_period_frames × channels × bytes_per_sample`
    pub fn for_config(hw: &HardwareStreamConfig) -> Self {
        Self::new(hw.actual_period_frames, hw.frame_bytes())
    }

    /// Capacity in frames
    pub fn capacity_frames(&self) -> usize {
        if self.frame_bytes == 0 {
            0
        } else {
            self.data.len() / self.frame_bytes
        }
    }

    /// Capacity in bytes
    pub fn capacity_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Whole region, for filling. Call [`SampleBuffer::set_filled`] afterwards.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record how many bytes of the region the current block occupies
    pub fn set_filled(&mut self, bytes: usize) {
        self.filled = bytes.min(self.data.len());
    }

    /// Whole frames in the current block
    pub fn frames(&self) -> usize {
        if self.frame_bytes == 0 {
            0
        } else {
            self.filled / self.frame_bytes
        }
    }

    /// Bytes of a trailing partial frame in the current block
    pub fn partial_frame_bytes(&self) -> usize {
        self.filled - self.frames() * self.frame_bytes
    }

    /// Current block from frame `offset` on, whole frames only
    pub fn frames_from(&self, offset: usize) -> &[u8] {
        let start = (offset * self.frame_bytes).min(self.filled);
        let end = self.frames() * self.frame_bytes;
        &self.data[start..end.max(start)]
    }

    /// Current block, whole frames only
    pub fn block(&self) -> &[u8] {
        self.frames_from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity() {
        let buffer = SampleBuffer::new(88, 4);
        assert_eq!(buffer.capacity_frames(), 88);
        assert_eq!(buffer.capacity_bytes(), 352);
        assert_eq!(buffer.frames(), 0);
        assert!(buffer.block().is_empty());
    }

    #[test]
    fn test_partial_frame_excluded_from_block() {
        let mut buffer = SampleBuffer::new(4, 4);
        buffer.as_mut_bytes().copy_from_slice(&(0u8..16).collect::<Vec<_>>());
        buffer.set_filled(10);

        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.partial_frame_bytes(), 2);
        assert_eq!(buffer.block(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(buffer.frames_from(1), &[4, 5, 6, 7]);
        assert!(buffer.frames_from(3).is_empty());
    }

    #[test]
    fn test_set_filled_clamped_to_capacity() {
        let mut buffer = SampleBuffer::new(2, 2);
        buffer.set_filled(100);
        assert_eq!(buffer.frames(), 2);
    }
}
