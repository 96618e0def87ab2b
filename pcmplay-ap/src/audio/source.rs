//! Sequential reader over the WAV payload
//!
//! The reader handed to [`SampleSource`] must already be positioned just
//! past the 44-byte header. Blocks are read forward only; the cursor never
//! moves back.

use crate::error::{Error, Result};
use crate::wav::HEADER_LEN;
use std::io::{ErrorKind, Read};
use tracing::trace;

/// Forward-only block reader over interleaved PCM frames
pub struct SampleSource<R> {
    reader: R,
    block_align: usize,
    /// Payload bytes consumed so far
    cursor: u64,
    /// Stop after this many payload bytes (the header's data_size)
    limit: Option<u64>,
    exhausted: bool,
}

impl<R: Read> SampleSource<R> {
    /// Source reading frames of `block_align` bytes until end of file
    pub fn new(reader: R, block_align: usize) -> Self {
        Self {
            reader,
            block_align,
            cursor: 0,
            limit: None,
            exhausted: false,
        }
    }

    /// Also stop once `data_size` payload bytes have been read
    pub fn with_data_limit(mut self, data_size: u64) -> Self {
        self.limit = Some(data_size);
        self
    }

    pub fn block_align(&self) -> usize {
        self.block_align
    }

    /// Absolute file offset of the next byte to be read
    pub fn position(&self) -> u64 {
        HEADER_LEN as u64 + self.cursor
    }

    /// Payload bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.cursor
    }

    /// Whether a previous block came back short
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read the next `count_frames` frames into `out`.
    ///
    /// Returns the filled prefix of `out`. A block shorter than requested
    /// means the payload ended (end of file or data_size reached); every
    /// later call returns an empty block.
    ///
    /// # Errors
    /// [`Error::ReadFailed`] on read failure, naming the file offset.
    pub fn next_block<'a>(&mut self, count_frames: usize, out: &'a mut [u8]) -> Result<&'a [u8]> {
        let requested = (count_frames * self.block_align).min(out.len());
        let mut wanted = requested;
        if let Some(limit) = self.limit {
            let remaining = limit.saturating_sub(self.cursor);
            wanted = wanted.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        if self.exhausted {
            return Ok(&out[..0]);
        }

        let mut got = 0;
        while got < wanted {
            match self.reader.read(&mut out[got..wanted]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::ReadFailed {
                        offset: self.position() + got as u64,
                        source,
                    })
                }
            }
        }

        self.cursor += got as u64;
        if got < requested {
            trace!("Short block: {} of {} bytes at offset {}", got, requested, self.position());
            self.exhausted = true;
        }
        Ok(&out[..got])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_blocks_advance_cursor() {
        let payload: Vec<u8> = (0..40).collect();
        let mut source = SampleSource::new(Cursor::new(payload), 4);
        let mut buf = [0u8; 16];

        assert_eq!(source.next_block(4, &mut buf).unwrap(), &(0u8..16).collect::<Vec<_>>()[..]);
        assert_eq!(source.position(), 44 + 16);
        assert_eq!(source.next_block(4, &mut buf).unwrap().len(), 16);

        let last = source.next_block(4, &mut buf).unwrap();
        assert_eq!(last, &[32, 33, 34, 35, 36, 37, 38, 39]);
        assert!(source.is_exhausted());
        assert!(source.next_block(4, &mut buf).unwrap().is_empty());
        assert_eq!(source.bytes_read(), 40);
    }

    #[test]
    fn test_data_limit_stops_before_eof() {
        let payload = vec![7u8; 100];
        let mut source = SampleSource::new(Cursor::new(payload), 2).with_data_limit(10);
        let mut buf = [0u8; 8];

        assert_eq!(source.next_block(4, &mut buf).unwrap().len(), 8);
        assert_eq!(source.next_block(4, &mut buf).unwrap().len(), 2);
        assert!(source.is_exhausted());
        assert_eq!(source.bytes_read(), 10);
    }

    #[test]
    fn test_truncated_payload_tolerated() {
        // data_size larger than what the file holds
        let mut source = SampleSource::new(Cursor::new(vec![1u8; 6]), 4).with_data_limit(1000);
        let mut buf = [0u8; 16];
        assert_eq!(source.next_block(4, &mut buf).unwrap().len(), 6);
        assert!(source.is_exhausted());
    }

    struct InterruptOnce {
        inner: Cursor<Vec<u8>>,
        interrupted: bool,
    }

    impl Read for InterruptOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(ErrorKind::Interrupted.into());
            }
            // Hand out at most 3 bytes per call
            let n = buf.len().min(3);
            self.inner.read(&mut buf[..n])
        }
    }

    struct FailAfter {
        inner: Cursor<Vec<u8>>,
        good_bytes: u64,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.inner.position() >= self.good_bytes {
                return Err(std::io::Error::other("disk gone"));
            }
            let n = buf.len().min((self.good_bytes - self.inner.position()) as usize);
            self.inner.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_read_failure_names_offset() {
        let reader = FailAfter {
            inner: Cursor::new(vec![0u8; 64]),
            good_bytes: 20,
        };
        let mut source = SampleSource::new(reader, 4);
        let mut buf = [0u8; 16];
        assert_eq!(source.next_block(4, &mut buf).unwrap().len(), 16);

        match source.next_block(4, &mut buf) {
            Err(Error::ReadFailed { offset, source }) => {
                assert_eq!(offset, 44 + 20);
                assert_eq!(source.to_string(), "disk gone");
            }
            other => panic!("expected read failure, got {:?}", other),
        }
    }

    #[test]
    fn test_short_reads_and_interrupts_fill_block() {
        let reader = InterruptOnce {
            inner: Cursor::new((0..32).collect()),
            interrupted: false,
        };
        let mut source = SampleSource::new(reader, 4);
        let mut buf = [0u8; 16];
        assert_eq!(source.next_block(4, &mut buf).unwrap().len(), 16);
        assert!(!source.is_exhausted());
    }
}
